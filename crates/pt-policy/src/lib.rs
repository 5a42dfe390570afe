//! Split-tunnel routing policy
//!
//! Decides, for a given application identifier, whether its traffic goes
//! through the tunnel. The policy is a mode plus a set of identifiers:
//!
//! | Mode       | Listed app | Unlisted app |
//! |------------|------------|--------------|
//! | `Disabled` | tunnel     | tunnel       |
//! | `Include`  | tunnel     | direct       |
//! | `Exclude`  | direct     | tunnel       |
//!
//! The [`PolicyStore`] holds one immutable [`SplitTunnelPolicy`] at a time and
//! swaps it wholesale on every update, so a reader always sees a mode together
//! with the app set it was written with.
//!
//! This crate does no I/O and makes no platform calls.

mod app_id;
mod policy;
mod store;

pub use app_id::{AppId, AppIdError, collect_apps, parse_app_list};
pub use policy::{RoutingMode, SplitTunnelPolicy};
pub use store::PolicyStore;
