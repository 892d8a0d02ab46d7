/// Entry point for the Creo Isolation host preparation tool.
///
/// Resolves the cgroup driver and version of the host and restores the irqbalance
/// configuration after a reboot, as configured through `CREO_ISOLATION_CONFIG`.
///
/// # Examples
///
/// ```bash
/// CGROUP_MANAGER=cgroupfs RUST_LOG=debug cargo run
/// ```
fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    creo_isolation::run()
}
