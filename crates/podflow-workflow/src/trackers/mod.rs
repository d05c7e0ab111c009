//! Clone, pull and checkout trackers built on [`TaskRegistry`](crate::registry::TaskRegistry).

mod checkout;
mod clone;
pub mod messages;
mod pull;

pub use checkout::{CheckoutIdentity, CheckoutRegistry, CheckoutTracker};
pub use clone::{CloneIdentity, CloneRegistry, CloneTracker};
pub use pull::{PullIdentity, PullRegistry, PullTracker};

use crate::registry::Correlated;
use podflow_core::payloads::{
    CheckoutProgressPayload, CheckoutResultPayload, CloneProgressPayload, CloneResultPayload,
    PullProgressPayload, PullResultPayload,
};

pub const GIT_TOAST_CATEGORY: &str = "Git";

macro_rules! correlated {
    ($($payload:ty),* $(,)?) => {
        $(
            impl Correlated for $payload {
                fn request_id(&self) -> &str {
                    &self.request_id
                }
            }
        )*
    };
}

correlated!(
    CloneProgressPayload,
    CloneResultPayload,
    PullProgressPayload,
    PullResultPayload,
    CheckoutProgressPayload,
    CheckoutResultPayload,
);
