pub mod activation;
pub mod identity;
pub mod mailer;
pub mod otp;
pub mod registration;

pub use activation::{ActivationContext, ActivationFlow, ActivationSessions};
pub use identity::IdentityService;
pub use mailer::{ApiMailer, Mailer};
pub use otp::{OtpError, OtpService};
pub use registration::RegistrationService;
