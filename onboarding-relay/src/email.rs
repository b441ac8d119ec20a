//! Email delivery of an onboarding submission.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;

use crate::{
    config::{AttachmentGroup, EmailConfig, EmailTransportConfig},
    errors::Error,
    submission::Submission,
};

pub struct EmailService {
    transport: EmailTransport,
    from: Mailbox,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    subject_prefix: String,
    attachment_groups: Vec<AttachmentGroup>,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

/// Parses a comma-separated list of addresses.
fn parse_mailboxes(list: &str, variable: &str) -> Result<Vec<Mailbox>, Error> {
    list.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(|addr| {
            addr.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse {variable} address '{addr}': {e}"),
            })
        })
        .collect()
}

impl EmailService {
    /// Builds the service from the operator settings. Fails with [`Error::MissingConfig`] when
    /// `SMTP_USER`, `SMTP_PASS` or `MAIL_TO` is absent.
    pub fn new(config: &EmailConfig) -> Result<Self, Error> {
        let credentials = config.credentials()?;

        let transport = match &config.transport {
            EmailTransportConfig::Smtp { host, port, use_tls } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(credentials.username.to_string(), credentials.password.to_string()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        let from = credentials.username.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse SMTP_USER address: {e}"),
        })?;
        let to = parse_mailboxes(credentials.to, "MAIL_TO")?;
        if to.is_empty() {
            return Err(Error::MissingConfig { variable: "MAIL_TO" });
        }
        let cc = credentials.cc.map(|cc| parse_mailboxes(cc, "MAIL_CC")).transpose()?.unwrap_or_default();

        Ok(Self {
            transport,
            from,
            to,
            cc,
            subject_prefix: config.subject_prefix.clone(),
            attachment_groups: config.attachment_groups.clone(),
        })
    }

    /// Sends the submission with every file attached. The submission is consumed so the
    /// attachment buffers move into the message instead of being copied.
    pub async fn send_submission(&self, submission: Submission) -> Result<(), Error> {
        let message = self.build_message(submission)?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }

    fn build_message(&self, submission: Submission) -> Result<Message, Error> {
        let subject = format_subject(&self.subject_prefix, &submission);
        let body = format_body(&submission, &self.attachment_groups);

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        for cc in &self.cc {
            builder = builder.cc(cc.clone());
        }

        if let Some(email) = submission.field("email") {
            match email.parse::<Mailbox>() {
                Ok(reply_to) => builder = builder.reply_to(reply_to),
                Err(e) => tracing::warn!(email = %email, "Ignoring unparseable submitter address for Reply-To: {e}"),
            }
        }

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(body));
        for file in submission.files {
            let content_type = ContentType::parse(&file.content_type)
                .or_else(|_| ContentType::parse("application/octet-stream"))
                .map_err(|e| Error::Internal {
                    operation: format!("build attachment content type: {e}"),
                })?;
            let filename = format!("{}_{}", file.field, file.filename);
            parts = parts.singlepart(MailAttachment::new(filename).body(file.content, content_type));
        }

        builder.multipart(parts).map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })
    }
}

/// `"[ONBOARDING] <nom> - <immatriculation>"`, or `"[ONBOARDING] Client"` without a name.
pub fn format_subject(prefix: &str, submission: &Submission) -> String {
    match (submission.field("nom"), submission.field("immatriculation")) {
        (None, _) => format!("{prefix} Client"),
        (Some(name), None) => format!("{prefix} {name}"),
        (Some(name), Some(registration)) => format!("{prefix} {name} - {registration}"),
    }
}

/// Reformats `YYYY-MM-DD` as `DD/MM/YYYY`; any other input is returned unchanged.
pub fn format_french_date(value: &str) -> String {
    let parts: Vec<&str> = value.split('-').collect();
    match parts.as_slice() {
        [year, month, day]
            if year.len() == 4
                && month.len() == 2
                && day.len() == 2
                && parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())) =>
        {
            format!("{day}/{month}/{year}")
        }
        _ => value.to_string(),
    }
}

/// Number of attachments posted under a field starting with `prefix`.
pub fn count_with_prefix(submission: &Submission, prefix: &str) -> usize {
    submission.files.iter().filter(|f| f.field.starts_with(prefix)).count()
}

/// Plain-text body listing the client's details and a summary of the attachments.
pub fn format_body(submission: &Submission, groups: &[AttachmentGroup]) -> String {
    let value = |name: &str| submission.field(name).unwrap_or("-").to_string();
    let date = submission.field("date").map(format_french_date).unwrap_or_else(|| "-".to_string());

    let mut body = String::from("Nouvelle demande d'onboarding client\n\n");
    body.push_str(&format!("Nom : {}\n", value("nom")));
    body.push_str(&format!("Email : {}\n", value("email")));
    body.push_str(&format!("Téléphone : {}\n", value("telephone")));
    body.push_str(&format!("Adresse : {}\n", value("adresse")));
    body.push_str(&format!("Immatriculation : {}\n", value("immatriculation")));
    body.push_str(&format!("Date : {date}\n"));

    body.push_str(&format!("\nPièces jointes : {}\n", submission.files.len()));
    for group in groups {
        body.push_str(&format!("- {} : {}\n", group.label, count_with_prefix(submission, &group.prefix)));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Attachment;
    use crate::test_utils::{create_test_config, submission_with};

    fn photo(field: &str, filename: &str) -> Attachment {
        Attachment {
            field: field.to_string(),
            filename: filename.to_string(),
            content_type: "image/jpeg".to_string(),
            content: b"\xff\xd8\xff".to_vec(),
        }
    }

    #[test]
    fn test_subject_with_name_and_registration() {
        let submission = submission_with(&[("nom", "Dupont"), ("immatriculation", "AB-123-CD")], vec![]);
        assert_eq!(format_subject("[ONBOARDING]", &submission), "[ONBOARDING] Dupont - AB-123-CD");
    }

    #[test]
    fn test_subject_falls_back_to_client() {
        let submission = submission_with(&[("email", "jean@example.com")], vec![]);
        assert_eq!(format_subject("[ONBOARDING]", &submission), "[ONBOARDING] Client");

        let blank = submission_with(&[("nom", "  ")], vec![]);
        assert_eq!(format_subject("[ONBOARDING]", &blank), "[ONBOARDING] Client");
    }

    #[test]
    fn test_subject_without_registration() {
        let submission = submission_with(&[("nom", "Dupont")], vec![]);
        assert_eq!(format_subject("[ONBOARDING]", &submission), "[ONBOARDING] Dupont");
    }

    #[test]
    fn test_french_date() {
        assert_eq!(format_french_date("2024-03-05"), "05/03/2024");
        assert_eq!(format_french_date("05/03/2024"), "05/03/2024");
        assert_eq!(format_french_date("2024-3-5"), "2024-3-5");
        assert_eq!(format_french_date("2024-03-05T10:00"), "2024-03-05T10:00");
        assert_eq!(format_french_date("abcd-ef-gh"), "abcd-ef-gh");
        assert_eq!(format_french_date(""), "");
    }

    #[test]
    fn test_body_lists_fields_and_counts() {
        let submission = submission_with(
            &[
                ("nom", "Dupont"),
                ("email", "jean@example.com"),
                ("telephone", "0601020304"),
                ("immatriculation", "AB-123-CD"),
                ("date", "2024-03-05"),
            ],
            vec![
                photo("degat_1", "a.jpg"),
                photo("degat_2", "b.jpg"),
                photo("hors_sinistre_1", "c.jpg"),
                photo("carte_grise", "d.jpg"),
            ],
        );

        let body = format_body(&submission, &EmailConfig::default().attachment_groups);

        assert!(body.contains("Nom : Dupont\n"));
        assert!(body.contains("Email : jean@example.com\n"));
        assert!(body.contains("Téléphone : 0601020304\n"));
        assert!(body.contains("Adresse : -\n"));
        assert!(body.contains("Immatriculation : AB-123-CD\n"));
        assert!(body.contains("Date : 05/03/2024\n"));
        assert!(body.contains("Pièces jointes : 4\n"));
        assert!(body.contains("- Photos dégâts : 2\n"));
        assert!(body.contains("- Photos hors sinistre : 1\n"));
    }

    #[test]
    fn test_count_with_prefix() {
        let submission = submission_with(
            &[],
            vec![photo("degat_1", "a.jpg"), photo("degats", "b.jpg"), photo("hors_sinistre_2", "c.jpg")],
        );
        assert_eq!(count_with_prefix(&submission, "degat_"), 1);
        assert_eq!(count_with_prefix(&submission, "hors_sinistre_"), 1);
        assert_eq!(count_with_prefix(&submission, "carte_"), 0);
    }

    #[test]
    fn test_service_requires_operator_settings() {
        let config = create_test_config();
        let mut email = config.email.clone();
        email.username = None;

        assert!(matches!(
            EmailService::new(&email),
            Err(Error::MissingConfig { variable: "SMTP_USER" })
        ));

        email.username = Some("relay@example.com".to_string());
        email.to = Some(" , ".to_string());
        assert!(matches!(EmailService::new(&email), Err(Error::MissingConfig { variable: "MAIL_TO" })));
    }

    #[test]
    fn test_message_headers_and_attachments() {
        let config = create_test_config();
        let service = EmailService::new(&config.email).unwrap();
        let submission = submission_with(
            &[("nom", "Dupont"), ("immatriculation", "AB-123-CD"), ("email", "jean@example.com")],
            vec![photo("degat_1", "avant.jpg"), photo("hors_sinistre_1", "arriere.jpg")],
        );

        let message = service.build_message(submission).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: [ONBOARDING] Dupont - AB-123-CD"));
        assert!(raw.contains("Reply-To: jean@example.com"));
        assert!(raw.contains("agence@example.com"));
        assert!(raw.contains("backoffice@example.com"));
        assert!(raw.contains("Cc: copie@example.com"));
        assert!(raw.contains("degat_1_avant.jpg"));
        assert!(raw.contains("hors_sinistre_1_arriere.jpg"));
    }

    #[test]
    fn test_invalid_submitter_email_skips_reply_to() {
        let config = create_test_config();
        let service = EmailService::new(&config.email).unwrap();
        let submission = submission_with(&[("nom", "Dupont"), ("email", "pas une adresse")], vec![]);

        let message = service.build_message(submission).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(!raw.contains("Reply-To"));
    }
}
