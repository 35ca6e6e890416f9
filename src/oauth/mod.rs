pub mod callback;
pub mod flow;
pub mod oob;
pub mod pkce;
pub mod receiver;
pub mod token;

pub use callback::{LocalCallbackServer, CALLBACK_PATH};
pub use flow::{AuthorizationRequest, FlowOptions, OAuthFlow};
pub use oob::{parse_pasted_code, OutOfBandReceiver, OOB_REDIRECT_URI};
pub use pkce::{derive_challenge, generate_state, generate_verifier, PkceChallenge};
pub use receiver::{Grant, ReceiverMode, Redirect, RedirectContext, RedirectReceiver};
pub use token::{OAuthClient, Token};
