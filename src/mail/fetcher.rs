//! IMAP side of the gateway.
//!
//! The `imap` crate is blocking, so every poll runs on the blocking thread
//! pool. A fresh connection is opened per cycle and torn down afterwards;
//! fetching `RFC822` implicitly marks messages `\Seen` on the server, which
//! is what keeps an already-fetched batch from being re-delivered on the
//! next cycle. A crash in between re-delivers the batch, which is exactly
//! the at-least-once behavior the idempotent store expects.

use crate::config::MailConfig;

use super::{GatewayError, RawMessage};

pub struct ImapFetcher {
    host: String,
    port: u16,
    username: String,
    password: String,
    mailbox: String,
}

impl ImapFetcher {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            host: config.imap_host.clone(),
            port: config.imap_port,
            username: config.username.clone(),
            password: config.password.clone(),
            mailbox: config.mailbox.clone(),
        }
    }

    pub async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, GatewayError> {
        let host = self.host.clone();
        let port = self.port;
        let username = self.username.clone();
        let password = self.password.clone();
        let mailbox = self.mailbox.clone();

        tokio::task::spawn_blocking(move || {
            fetch_blocking(&host, port, &username, &password, &mailbox)
        })
        .await?
    }
}

fn fetch_blocking(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    mailbox: &str,
) -> Result<Vec<RawMessage>, GatewayError> {
    log::debug!("connecting to imap {}:{}", host, port);

    let tls = native_tls::TlsConnector::builder().build()?;
    let client = imap::connect((host, port), host, &tls)?;
    let mut session = client.login(username, password).map_err(|(err, _)| err)?;

    session.select(mailbox)?;

    let unseen = session.search("UNSEEN")?;
    if unseen.is_empty() {
        session.logout().ok();
        return Ok(Vec::new());
    }

    let set = unseen
        .iter()
        .map(|seq| seq.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut messages = Vec::new();
    for fetch in session.fetch(&set, "RFC822")?.iter() {
        match fetch.body() {
            Some(body) => messages.push(RawMessage {
                uid: fetch.uid,
                bytes: body.to_vec(),
            }),
            None => log::warn!("imap fetch returned a message without a body, skipping"),
        }
    }

    log::debug!("fetched {} unseen messages", messages.len());

    session.logout().ok();
    Ok(messages)
}
