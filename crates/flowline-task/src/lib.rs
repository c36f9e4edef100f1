mod code;
mod contact;
mod delay;
mod email;
mod error;
mod handler;
mod http;
mod log;
mod logic;
mod registry;
mod types;

pub use code::CustomCodeHandler;
pub use contact::{
  AddTagHandler, Contact, ContactDirectory, CreateContactHandler, InMemoryContacts,
  UpdateContactHandler,
};
pub use delay::{DelayHandler, WaitForConditionHandler, WaitForEventHandler, duration_from};
pub use email::{EmailMessage, LogMailer, Mailer, SendEmailHandler};
pub use error::TaskError;
pub use handler::NodeHandler;
pub use http::HttpHandler;
pub use log::LogHandler;
pub use logic::{ConditionHandler, DateRangeHandler, FilterHandler, ScoreThresholdHandler};
pub use registry::{Builtins, HandlerRegistry};
pub use types::{SuspendRequest, TaskContext, TaskOutcome, TaskOutput};
