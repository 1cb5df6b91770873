/*!
# Uptime DevKit - test doubles for the uptime kernel

Lets the kernel run end to end without a network or a disk:
- scripted probe transport (per-address replies, delays, hangs)
- static host directory that can be edited or switched off
- event store wrapper that injects per-host write failures
- harness wiring them into a real scheduler, aggregator and rollup job
*/

pub mod directory_stub;
pub mod store_stub;
pub mod test_utils;
pub mod transport_stub;

pub use directory_stub::StaticDirectory;
pub use store_stub::FlakyStore;
pub use test_utils::{init_tracing, utc, TestHarness};
pub use transport_stub::{Scripted, ScriptedTransport};
