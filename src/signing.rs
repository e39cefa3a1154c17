//! The signer-facing side: opaque access tokens, session resolution and
//! value submission. Signers never see database identifiers, only their
//! token.

use crate::schema::{DocumentStatus, FieldType};
use crate::store::Store;
use crate::{models, Error};

/// Mint an opaque signer access token. 64 random bytes, URL-safe base64 so
/// it can sit in a path segment.
pub fn mint_signer_token() -> String {
    use rand::Rng;
    base64::encode_config(
        rand::thread_rng()
            .sample_iter(rand::distributions::Standard)
            .take(64)
            .collect::<Vec<u8>>(),
        base64::URL_SAFE_NO_PAD,
    )
}

/// What a signer is shown when they open their link. Field values are
/// withheld; a signer supplies values, they do not read them back.
#[derive(Debug, Clone)]
pub struct SigningSession {
    pub document_id: uuid::Uuid,
    pub title: String,
    pub signer_name: String,
    pub fields: Vec<models::Field>,
}

/// A submitted value for one field of the session's document.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub field_id: uuid::Uuid,
    pub value: String,
}

/// Resolve a token to the signer's outstanding document. Any failure mode
/// collapses to [`Error::InvalidToken`] so the endpoint does not leak
/// whether a token ever existed.
pub fn resolve_session<S: Store>(store: &S, token: &str) -> Result<SigningSession, Error> {
    let signer = store.signer_by_token(token)?.ok_or(Error::InvalidToken)?;

    let mut outstanding = store
        .documents_for_signer(signer.id)?
        .into_iter()
        .filter(|d| d.status == DocumentStatus::Sent)
        .collect::<Vec<_>>();
    if outstanding.is_empty() {
        return Err(Error::InvalidToken);
    }
    if outstanding.len() > 1 {
        warn!(
            "signer {} has {} outstanding documents, serving the oldest",
            signer.id,
            outstanding.len()
        );
    }
    let document = outstanding.remove(0);

    let fields = store
        .document_fields(document.id)?
        .into_iter()
        .map(|f| models::Field {
            value: None,
            ..f
        })
        .collect();

    Ok(SigningSession {
        document_id: document.id,
        title: document.title,
        signer_name: signer.name,
        fields,
    })
}

/// Accept a signer's values and complete the document. All-or-nothing: a
/// single bad field reference or missing signature aborts before anything
/// is persisted.
pub fn submit_values<S: Store>(
    store: &S,
    token: &str,
    values: &[FieldValue],
) -> Result<(), Error> {
    let session = resolve_session(store, token)?;

    for value in values {
        if !session.fields.iter().any(|f| f.id == value.field_id) {
            return Err(Error::NotFound("field"));
        }
    }

    for field in &session.fields {
        let supplied = values.iter().find(|v| v.field_id == field.id);
        if field.field_type == FieldType::Signature {
            match supplied {
                None => {
                    return Err(Error::Validation(
                        "every signature field must be filled in".to_string(),
                    ))
                }
                Some(v) if !v.value.starts_with("data:") || !v.value.contains(',') => {
                    return Err(Error::Validation(
                        "signature values must be data URIs".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }
    }

    let values = values
        .iter()
        .map(|v| (v.field_id, v.value.clone()))
        .collect::<Vec<_>>();
    store.apply_submission(session.document_id, &values)
}
