// The exported macros expand without the caller naming `tracing`.

#[test]
fn test_domain_macros_expand_through_the_grid_crate() {
    grid::logging::init_test();

    let span = grid::node_span!(3u64, component = "inbound");
    let _guard = span.enter();

    grid::log_routing!("user-17", "remote", owner = 2);
    grid::log_relocation!("user-17", "shipped", to = 2, pending = 3);
    grid::log_buffer!("outbound-2", "deferred");
}
