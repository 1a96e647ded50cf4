//! Wire types used by slotclaim.
//!
//! Two protocols are described here:
//! * the subset of the Chrome DevTools Protocol (CDP) the browser driver speaks
//! * the wrapped payload returned by the remote reservation endpoint
//!
//! Types in this crate are pure data. Behavior lives in `slotclaim-runtime`
//! and `slotclaim`.

pub mod cdp;
pub mod claim;

pub use cdp::*;
pub use claim::*;
