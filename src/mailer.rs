//! Outbound mail: sends the HTML report as an attachment.

use crate::config::MailSettings;
use crate::error::{DashboardError, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::info;

fn mail_err(e: impl std::fmt::Display) -> DashboardError {
    DashboardError::Mail(e.to_string())
}

/// SMTP login of the registered application: `<client id>.<tenant>`.
pub fn smtp_username(settings: &MailSettings) -> String {
    format!("{}.{}", settings.client_id, settings.tenant)
}

pub struct Mailer {
    smtp: SmtpTransport,
    sender: Mailbox,
}

impl Mailer {
    pub fn new(settings: &MailSettings) -> Result<Self> {
        let creds = Credentials::new(smtp_username(settings), settings.client_secret.clone());
        let smtp = SmtpTransport::starttls_relay(&settings.smtp_host)
            .map_err(mail_err)?
            .credentials(creds)
            .build();
        let sender = settings.sender.parse::<Mailbox>().map_err(mail_err)?;
        Ok(Mailer { smtp, sender })
    }

    /// Sends `html` as `informe_cobros.html` to `to`. Blocking; call it off
    /// the async runtime.
    pub fn send_report(&self, to: &str, generated_at: &str, html: String) -> Result<()> {
        let email = report_message(&self.sender, to, generated_at, html)?;
        self.smtp.send(&email).map_err(mail_err)?;
        info!("report mailed to {}", to);
        Ok(())
    }
}

/// Builds the report mail: a short plain-text body plus the HTML attachment.
pub fn report_message(sender: &Mailbox, to: &str, generated_at: &str, html: String) -> Result<Message> {
    let to: Mailbox = to.trim().parse().map_err(mail_err)?;
    let body = format!(
        "Se adjunta el informe de gestión de cobro generado el {}.",
        generated_at
    );
    Message::builder()
        .from(sender.clone())
        .to(to)
        .subject(format!("Informe de gestión de cobro {}", generated_at))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(body))
                .singlepart(
                    Attachment::new("informe_cobros.html".to_string())
                        .body(html, ContentType::TEXT_HTML),
                ),
        )
        .map_err(mail_err)
}
