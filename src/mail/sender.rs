//! SMTP side of the gateway, built on lettre's async transport.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;

use super::{GatewayError, OutboundEmail};

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    pub fn new(config: &MailConfig) -> Result<Self, GatewayError> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self { transport })
    }

    pub async fn send(&self, outbound: &OutboundEmail) -> Result<(), GatewayError> {
        let message = build_message(outbound)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

fn parse_address(address: &str) -> Result<Address, GatewayError> {
    address.parse().map_err(|source| GatewayError::Address {
        address: address.to_string(),
        source,
    })
}

fn build_message(outbound: &OutboundEmail) -> Result<Message, GatewayError> {
    let from = Mailbox::new(
        Some(outbound.from_name.clone()),
        parse_address(&outbound.from_address)?,
    );
    let to = Mailbox::new(None, parse_address(&outbound.to_address)?);

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(outbound.subject.clone())
        .message_id(Some(format!("<{}>", outbound.message_id)));

    if let Some(parent) = &outbound.in_reply_to {
        builder = builder.in_reply_to(format!("<{parent}>"));
    }

    if !outbound.references.is_empty() {
        let chain = outbound
            .references
            .iter()
            .map(|reference| format!("<{reference}>"))
            .collect::<Vec<_>>()
            .join(" ");
        builder = builder.references(chain);
    }

    Ok(builder.body(outbound.body.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> OutboundEmail {
        OutboundEmail {
            from_address: "support@example.com".into(),
            from_name: "Support Team".into(),
            to_address: "customer@example.org".into(),
            subject: "Ticket created: SUP-1 - Printer broken".into(),
            message_id: "generated@example.com".into(),
            in_reply_to: Some("origin@example.org".into()),
            references: vec!["older@example.org".into(), "origin@example.org".into()],
            body: "body".into(),
        }
    }

    #[test]
    fn builds_threaded_message_headers() {
        let message = build_message(&outbound()).expect("message builds");
        let rendered = String::from_utf8(message.formatted()).expect("utf-8 message");

        assert!(rendered.contains("Message-ID: <generated@example.com>"));
        assert!(rendered.contains("In-Reply-To: <origin@example.org>"));
        assert!(rendered.contains("References: <older@example.org> <origin@example.org>"));
        assert!(rendered.contains("Subject: Ticket created: SUP-1 - Printer broken"));
    }

    #[test]
    fn rejects_unparseable_recipient() {
        let mut bad = outbound();
        bad.to_address = "not an address".into();

        assert!(matches!(
            build_message(&bad),
            Err(GatewayError::Address { .. })
        ));
    }
}
