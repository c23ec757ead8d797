//! Mail transport gateway.
//!
//! The processing core talks to the mailbox through the [`MailGateway`]
//! trait: fetch the unseen batch, send a rendered reply. The production
//! implementation pairs an IMAP fetcher with an SMTP sender; tests swap in
//! an in-memory fake. Fetching is at-least-once: duplicate deliveries are
//! expected here and absorbed downstream by the item store's message-id
//! uniqueness, never prevented at the transport.

pub mod fetcher;
pub mod sender;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::MailConfig;
use self::fetcher::ImapFetcher;
use self::sender::SmtpSender;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("imap: {0}")]
    Imap(#[from] imap::error::Error),

    #[error("tls: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("invalid address `{address}`: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("message build: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("mail task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// A message exactly as fetched from the mailbox, undecoded.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: Option<u32>,
    pub bytes: Vec<u8>,
}

/// A fully prepared outbound message. Message ids are stored bare; the
/// transport adds angle brackets on the wire.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from_address: String,
    pub from_name: String,
    pub to_address: String,
    pub subject: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    /// Reference chain, oldest first, own message id last.
    pub references: Vec<String>,
    pub body: String,
}

#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Fetch the current batch of unseen messages. At-least-once: a message
    /// may be returned again after a crash between fetch and commit.
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, GatewayError>;

    /// Hand one message to the outbound transport.
    async fn send(&self, message: &OutboundEmail) -> Result<(), GatewayError>;
}

/// Production gateway: IMAP4-SSL inbound, SMTPS outbound.
pub struct ImapSmtpGateway {
    fetcher: ImapFetcher,
    sender: SmtpSender,
}

impl ImapSmtpGateway {
    pub fn new(config: &MailConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            fetcher: ImapFetcher::new(config),
            sender: SmtpSender::new(config)?,
        })
    }
}

#[async_trait]
impl MailGateway for ImapSmtpGateway {
    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, GatewayError> {
        self.fetcher.fetch_unseen().await
    }

    async fn send(&self, message: &OutboundEmail) -> Result<(), GatewayError> {
        self.sender.send(message).await
    }
}
