use crate::domain::command::{Command, Shared, lock};
use crate::error::{CommandError, UndoFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_SUBJECT_LEN: usize = 120;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmailError {
    #[error("recipient is required")]
    MissingRecipient,
    #[error("subject too long ({len} > {max} chars)")]
    SubjectTooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail receiver. Sent messages accumulate in the outbox.
#[derive(Debug, Clone)]
pub struct EmailService {
    max_subject_len: usize,
    outbox: Vec<Email>,
}

impl Default for EmailService {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBJECT_LEN)
    }
}

impl EmailService {
    pub fn new(max_subject_len: usize) -> Self {
        Self {
            max_subject_len,
            outbox: Vec::new(),
        }
    }

    pub fn max_subject_len(&self) -> usize {
        self.max_subject_len
    }

    pub fn outbox(&self) -> &[Email] {
        &self.outbox
    }

    pub fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        if to.trim().is_empty() {
            return Err(EmailError::MissingRecipient);
        }
        let len = subject.chars().count();
        if len > self.max_subject_len {
            return Err(EmailError::SubjectTooLong {
                len,
                max: self.max_subject_len,
            });
        }
        self.outbox.push(Email {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Sends one message. A sent email cannot be recalled, so undo only resets
/// the executed flag.
pub struct SendEmailCommand {
    service: Shared<EmailService>,
    email: Email,
    description: String,
    executed: bool,
}

impl SendEmailCommand {
    pub fn new(
        service: &Shared<EmailService>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let email = Email {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        };
        Self {
            service: service.clone(),
            description: format!("SendEmail(to={})", email.to),
            email,
            executed: false,
        }
    }
}

#[async_trait]
impl Command for SendEmailCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }
        let Email { to, subject, body } = &self.email;
        lock(&self.service)
            .send(to, subject, body)
            .map_err(|e| CommandError::receiver(&self.description, e))?;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        self.executed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::shared;

    #[test]
    fn test_send_validates_input() {
        let mut service = EmailService::new(5);
        assert_eq!(service.send("", "hi", "b"), Err(EmailError::MissingRecipient));
        assert_eq!(
            service.send("u@example.com", "too long", "b"),
            Err(EmailError::SubjectTooLong { len: 8, max: 5 })
        );
        assert!(service.outbox().is_empty());

        service.send("u@example.com", "hello", "b").unwrap();
        assert_eq!(service.outbox().len(), 1);
        assert_eq!(service.outbox()[0].subject, "hello");
    }

    #[tokio::test]
    async fn test_send_command() {
        let service = shared(EmailService::default());
        let mut cmd = SendEmailCommand::new(&service, "u@example.com", "S", "B");
        assert_eq!(cmd.description(), "SendEmail(to=u@example.com)");

        cmd.execute().await.unwrap();
        assert!(cmd.executed());
        assert_eq!(lock(&service).outbox().len(), 1);

        cmd.undo().await.unwrap();
        assert!(!cmd.executed());
        assert_eq!(lock(&service).outbox().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_surfaces_email_error() {
        let service = shared(EmailService::new(3));
        let mut cmd = SendEmailCommand::new(&service, "u@example.com", "Subject", "B");

        let err = cmd.execute().await.unwrap_err();

        assert_eq!(
            err.receiver_error::<EmailError>(),
            Some(&EmailError::SubjectTooLong { len: 7, max: 3 })
        );
        assert!(!cmd.executed());
    }
}
