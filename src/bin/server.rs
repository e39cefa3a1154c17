#[macro_use]
extern crate log;

#[tokio::main]
async fn main() -> Result<(), rocket::Error> {
    pretty_env_logger::init();

    let app = quillsign::setup().await;

    let mut smtp_transport_builder =
        lettre::transport::smtp::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(
            &app.smtp_conf.server,
        )
        .port(app.smtp_conf.port);
    if app.smtp_conf.use_tls {
        smtp_transport_builder = smtp_transport_builder.tls(
            lettre::transport::smtp::client::Tls::Required(
                lettre::transport::smtp::client::TlsParameters::new(app.smtp_conf.server.clone())
                    .expect("Unable to setup SMTP TLS parameters"),
            ),
        );
    }
    if let Some(auth) = &app.smtp_conf.auth {
        smtp_transport_builder = smtp_transport_builder.credentials(
            lettre::transport::smtp::authentication::Credentials::new(
                auth.username.clone(),
                auth.password.clone(),
            ),
        )
    }
    let mailer = quillsign::notify::Mailer::new(
        Box::new(smtp_transport_builder.build()),
        app.external_uri.clone(),
        app.smtp_conf.from.clone(),
    );

    info!("QuillSign server starting...");

    app.rocket
        .attach(quillsign::DbConn::fairing())
        .manage(quillsign::files::BlobStore::new(&app.files_dir))
        .manage(mailer)
        .mount("/", quillsign::views::routes())
        .launch()
        .await?;
    Ok(())
}
