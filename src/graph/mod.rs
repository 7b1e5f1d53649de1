//! Microsoft Graph delivery

pub mod credential;
pub mod dispatcher;
pub mod error;

pub use credential::{ClientCertificateCredential, TokenCredential};
pub use dispatcher::{GraphDispatcher, MailDispatcher, SendMailRequest};
pub use error::{CredentialError, DispatchError};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{DispatchError, MailDispatcher};
    use crate::email::OutboundMessage;

    type Failure = Box<dyn Fn() -> DispatchError + Send + Sync>;

    /// Keeps every dispatched message, optionally failing each call
    #[derive(Default)]
    pub struct RecordingDispatcher {
        messages: Mutex<Vec<OutboundMessage>>,
        attempts: AtomicUsize,
        failure: Option<Failure>,
    }

    impl RecordingDispatcher {
        pub fn failing(failure: impl Fn() -> DispatchError + Send + Sync + 'static) -> Self {
            Self {
                failure: Some(Box::new(failure)),
                ..Default::default()
            }
        }

        pub fn messages(&self) -> Vec<OutboundMessage> {
            self.messages.lock().unwrap().clone()
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MailDispatcher for RecordingDispatcher {
        async fn dispatch(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = &self.failure {
                return Err(failure());
            }
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
