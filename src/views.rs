use crate::store::{PgStore, Store};
use crate::{documents, files, models, notify, schema, signing, DbConn, DocumentId, Error, FieldId, SignerId};
use rocket::data::ToByteUnit;
use rocket::serde::json::Json;
use rocket::State;

const MAX_UPLOAD_SIZE_MIB: u64 = 32;

pub fn routes() -> Vec<rocket::Route> {
    routes![
        upload_document,
        list_documents,
        get_document,
        download_document,
        prepare_document,
        send_document,
        get_signing_session,
        submit_signing_session,
        finalize_document,
        download_signed_document,
    ]
}

/// JSON error body with the HTTP status the error maps to.
#[derive(Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: rocket::http::Status,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) | Error::InvalidToken => rocket::http::Status::NotFound,
            Error::Validation(_) | Error::Decode(_) | Error::PagePlacement(_) => {
                rocket::http::Status::BadRequest
            }
            Error::InvalidState(_) => rocket::http::Status::Conflict,
            Error::Render(_) | Error::Store(_) | Error::Io(_) | Error::Mail(_) => {
                warn!("request failed: {}", err);
                rocket::http::Status::InternalServerError
            }
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status = self.status;
        let mut response = Json(self).respond_to(req)?;
        response.set_status(status);
        Ok(response)
    }
}

async fn db_run<T, F>(db: &DbConn, func: F) -> Result<T, Error>
where
    T: 'static + Send,
    F: 'static + FnOnce(&diesel::PgConnection) -> Result<T, Error> + Send,
{
    db.run(move |c| func(c)).await
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerResponse {
    id: SignerId,
    name: String,
    email: String,
}

impl From<models::Signer> for SignerResponse {
    fn from(signer: models::Signer) -> Self {
        Self {
            id: SignerId::new(signer.id),
            name: signer.name,
            email: signer.email,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldResponse {
    id: FieldId,
    #[serde(rename = "type")]
    field_type: schema::FieldType,
    page: i64,
    x: f64,
    y: f64,
    order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl From<models::Field> for FieldResponse {
    fn from(field: models::Field) -> Self {
        Self {
            id: FieldId::new(field.id),
            field_type: field.field_type,
            page: field.page,
            x: field.pos_x,
            y: field.pos_y,
            order: field.field_order,
            value: field.value,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    id: DocumentId,
    title: String,
    status: schema::DocumentStatus,
    uploaded_by: String,
    created_at: chrono::NaiveDateTime,
    signer: Option<SignerResponse>,
    fields: Vec<FieldResponse>,
}

impl From<documents::DocumentSnapshot> for DocumentResponse {
    fn from(snapshot: documents::DocumentSnapshot) -> Self {
        Self {
            id: DocumentId::new(snapshot.document.id),
            title: snapshot.document.title,
            status: snapshot.document.status,
            uploaded_by: snapshot.document.uploaded_by,
            created_at: snapshot.document.created_at,
            signer: snapshot.signer.map(SignerResponse::from),
            fields: snapshot.fields.into_iter().map(FieldResponse::from).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    id: DocumentId,
    title: String,
    status: schema::DocumentStatus,
    created_at: chrono::NaiveDateTime,
}

impl From<models::Document> for DocumentSummary {
    fn from(document: models::Document) -> Self {
        Self {
            id: DocumentId::new(document.id),
            title: document.title,
            status: document.status,
            created_at: document.created_at,
        }
    }
}

#[post("/documents?<title>&<uploader>", data = "<file>")]
pub async fn upload_document(
    db: DbConn,
    blobs: &State<files::BlobStore>,
    title: String,
    uploader: String,
    file: rocket::data::Data<'_>,
) -> Result<Json<DocumentResponse>, ApiError> {
    if title.trim().is_empty() {
        return Err(Error::Validation("document title is required".to_string()).into());
    }
    let bytes = file
        .open(MAX_UPLOAD_SIZE_MIB.mebibytes())
        .into_bytes()
        .await
        .map_err(Error::Io)?;
    if !bytes.is_complete() {
        return Err(Error::Validation(format!(
            "uploaded file exceeds {} MiB",
            MAX_UPLOAD_SIZE_MIB
        ))
        .into());
    }
    let bytes = bytes.into_inner();
    if !bytes.starts_with(b"%PDF") {
        return Err(Error::Validation("uploaded file is not a PDF".to_string()).into());
    }

    let file_ref = format!("{}.pdf", uuid::Uuid::new_v4());
    blobs.store(&file_ref, &bytes).await?;

    let stored_ref = file_ref.clone();
    let document = match db_run(&db, move |c| {
        documents::upload(&PgStore::new(c), &title, &uploader, &file_ref)
    })
    .await
    {
        Ok(document) => document,
        Err(err) => {
            if let Err(cleanup) = blobs.remove(&stored_ref).await {
                warn!("failed to discard blob {}: {}", stored_ref, cleanup);
            }
            return Err(err.into());
        }
    };
    info!("document {} uploaded by {}", document.id, document.uploaded_by);

    let document_id = document.id;
    let snapshot = db_run(&db, move |c| {
        documents::snapshot(&PgStore::new(c), document_id)
    })
    .await?;
    Ok(Json(snapshot.into()))
}

#[get("/documents")]
pub async fn list_documents(db: DbConn) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let docs = db_run(&db, move |c| PgStore::new(c).documents()).await?;
    Ok(Json(docs.into_iter().map(DocumentSummary::from).collect()))
}

#[get("/documents/<did>")]
pub async fn get_document(db: DbConn, did: DocumentId) -> Result<Json<DocumentResponse>, ApiError> {
    let snapshot = db_run(&db, move |c| documents::snapshot(&PgStore::new(c), did.uuid)).await?;
    Ok(Json(snapshot.into()))
}

#[get("/documents/<did>/download")]
pub async fn download_document(
    db: DbConn,
    blobs: &State<files::BlobStore>,
    did: DocumentId,
) -> Result<(rocket::http::ContentType, Vec<u8>), ApiError> {
    let document = db_run(&db, move |c| {
        PgStore::new(c)
            .document(did.uuid)?
            .ok_or(Error::NotFound("document"))
    })
    .await?;
    let contents = blobs.retrieve(&document.file_ref).await?;
    Ok((rocket::http::ContentType::PDF, contents))
}

#[derive(Deserialize)]
pub struct PrepareRequest {
    pub signer: documents::SignerSpec,
    pub fields: Vec<documents::FieldSpec>,
}

#[post("/documents/<did>/prepare", data = "<data>", format = "application/json")]
pub async fn prepare_document(
    db: DbConn,
    did: DocumentId,
    data: Json<PrepareRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let data = data.into_inner();
    let snapshot = db_run(&db, move |c| {
        documents::prepare(&PgStore::new(c), did.uuid, &data.signer, &data.fields)
    })
    .await?;
    Ok(Json(snapshot.into()))
}

#[post("/documents/<did>/send")]
pub async fn send_document(
    db: DbConn,
    mailer: &State<notify::Mailer>,
    did: DocumentId,
) -> Result<Json<DocumentResponse>, ApiError> {
    let (document, signer) =
        db_run(&db, move |c| documents::send(&PgStore::new(c), did.uuid)).await?;
    let token = signer
        .token
        .clone()
        .ok_or_else(|| Error::Store("signer token missing after send".to_string()))?;

    mailer.send_signing_request(&document, &signer, &token).await?;
    info!("document {} sent to {}", document.id, signer.email);

    let snapshot = db_run(&db, move |c| documents::snapshot(&PgStore::new(c), did.uuid)).await?;
    Ok(Json(snapshot.into()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    document_id: DocumentId,
    title: String,
    signer_name: String,
    fields: Vec<FieldResponse>,
}

impl From<signing::SigningSession> for SessionResponse {
    fn from(session: signing::SigningSession) -> Self {
        Self {
            document_id: DocumentId::new(session.document_id),
            title: session.title,
            signer_name: session.signer_name,
            fields: session.fields.into_iter().map(FieldResponse::from).collect(),
        }
    }
}

#[get("/sign/<token>")]
pub async fn get_signing_session(
    db: DbConn,
    token: String,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = db_run(&db, move |c| {
        signing::resolve_session(&PgStore::new(c), &token)
    })
    .await?;
    Ok(Json(session.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedValue {
    pub field_id: String,
    pub value: String,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub values: Vec<SubmittedValue>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    status: schema::DocumentStatus,
}

#[post("/sign/<token>", data = "<data>", format = "application/json")]
pub async fn submit_signing_session(
    db: DbConn,
    token: String,
    data: Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let values = data
        .into_inner()
        .values
        .into_iter()
        .map(|v| {
            let raw = v.field_id.strip_prefix("field_").unwrap_or(&v.field_id);
            match uuid::Uuid::parse_str(raw) {
                Ok(field_id) => Ok(signing::FieldValue {
                    field_id,
                    value: v.value,
                }),
                Err(_) => Err(Error::Validation(format!(
                    "{} is not a valid field id",
                    v.field_id
                ))),
            }
        })
        .collect::<Result<Vec<_>, Error>>()?;

    db_run(&db, move |c| {
        signing::submit_values(&PgStore::new(c), &token, &values)
    })
    .await?;
    Ok(Json(SubmitResponse {
        status: schema::DocumentStatus::Signed,
    }))
}

#[get("/documents/<did>/final")]
pub async fn finalize_document(
    db: DbConn,
    did: DocumentId,
) -> Result<Json<DocumentResponse>, ApiError> {
    let snapshot = db_run(&db, move |c| documents::snapshot(&PgStore::new(c), did.uuid)).await?;
    Ok(Json(snapshot.into()))
}

#[get("/documents/<did>/signed-pdf")]
pub async fn download_signed_document(
    db: DbConn,
    blobs: &State<files::BlobStore>,
    did: DocumentId,
) -> Result<(rocket::http::ContentType, Vec<u8>), ApiError> {
    let snapshot = db_run(&db, move |c| documents::snapshot(&PgStore::new(c), did.uuid)).await?;
    let rendered = documents::render_signed(blobs, &snapshot).await?;
    info!("document {} rendered", snapshot.document.id);
    Ok((rocket::http::ContentType::PDF, rendered))
}
