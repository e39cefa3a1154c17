//! Outbound email. The transport is abstracted so the binary picks SMTP
//! while tests use the stub.

use crate::{models, Error};

lazy_static::lazy_static! {
    static ref TEMPLATES: tera::Tera = {
        let mut tera = match tera::Tera::new("templates_email/**/*") {
            Ok(t) => t,
            Err(e) => {
                error!("Unable to parse email templates: {}", e);
                std::process::exit(-1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

#[rocket::async_trait]
pub trait EmailTransport {
    async fn send(&self, msg: lettre::Message) -> Result<(), Error>;
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::stub::AsyncStubTransport {
    async fn send(&self, msg: lettre::Message) -> Result<(), Error> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(()) => Ok(()),
            Err(err) => Err(Error::Mail(err.to_string())),
        }
    }
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::file::AsyncFileTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> Result<(), Error> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(Error::Mail(format!("unable to save email to file: {}", err))),
        }
    }
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::smtp::AsyncSmtpTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> Result<(), Error> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(Error::Mail(format!("unable to send email with SMTP: {}", err))),
        }
    }
}

pub struct Mailer {
    transport: Box<dyn EmailTransport + Send + Sync>,
    external_uri: String,
    from: String,
}

#[derive(Serialize)]
struct SignRequestContext {
    signer_name: String,
    document_title: String,
    signing_url: String,
}

impl Mailer {
    pub fn new(
        transport: Box<dyn EmailTransport + Send + Sync>,
        external_uri: String,
        from: String,
    ) -> Self {
        Self {
            transport,
            external_uri,
            from,
        }
    }

    /// Email the signer their signing link for a freshly sent document.
    pub async fn send_signing_request(
        &self,
        document: &models::Document,
        signer: &models::Signer,
        token: &str,
    ) -> Result<(), Error> {
        let context = tera::Context::from_serialize(SignRequestContext {
            signer_name: signer.name.clone(),
            document_title: document.title.clone(),
            signing_url: format!("{}/sign/{}", self.external_uri, token),
        })
        .map_err(|err| Error::Mail(format!("unable to encode template context: {}", err)))?;
        let email_html = TEMPLATES
            .render("sign_request.html", &context)
            .map_err(|err| Error::Mail(format!("unable to render template: {}", err)))?;
        let email_txt = TEMPLATES
            .render("sign_request.txt", &context)
            .map_err(|err| Error::Mail(format!("unable to render template: {}", err)))?;

        let message = lettre::message::Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|err| Error::Mail(format!("invalid from address: {}", err)))?,
            )
            .to(lettre::message::Mailbox {
                name: Some(signer.name.clone()),
                email: signer
                    .email
                    .parse()
                    .map_err(|err| Error::Mail(format!("invalid signer address: {}", err)))?,
            })
            .subject(format!(
                "Your signature is requested on: {}",
                document.title
            ))
            .multipart(lettre::message::MultiPart::alternative_plain_html(
                email_txt, email_html,
            ))
            .map_err(|err| Error::Mail(format!("unable to generate email: {}", err)))?;

        self.transport.send(message).await
    }
}
