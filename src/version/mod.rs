//! Build-change detection and full invalidation of derived state.

mod fingerprint;
mod invalidator;
mod remote;
mod restart;

pub use fingerprint::{RuntimeIdentity, VersionFingerprint};
pub use invalidator::{VersionInvalidator, SCRATCH_PREFIX};
pub use remote::RetryPolicy;
pub use restart::{ProcessRestarter, Restarter};
