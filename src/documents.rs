//! Document lifecycle: upload, preparation (signer and field placement),
//! sending, and rendering of the completed file. Every state change goes
//! through the [`Store`] so the forward-only status progression is enforced
//! in one place.

use crate::schema::DocumentStatus;
use crate::store::Store;
use crate::{files, models, pdf, schema, signing, Error};
use itertools::Itertools;

/// Requested signer for a document. Matched against existing signers by
/// exact email.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerSpec {
    pub name: String,
    pub email: String,
}

/// Requested field placement. Pages are 1-indexed; coordinates are PDF
/// user-space units with the origin at the bottom-left of the page.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: schema::FieldType,
    pub page: i64,
    pub x: f64,
    pub y: f64,
}

/// A document with its signer and fields resolved, fields in draw order.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub document: models::Document,
    pub signer: Option<models::Signer>,
    pub fields: Vec<models::Field>,
}

pub fn signed_file_name(document_id: uuid::Uuid) -> String {
    format!("signed-{}.pdf", document_id)
}

pub fn upload<S: Store>(
    store: &S,
    title: &str,
    uploaded_by: &str,
    file_ref: &str,
) -> Result<models::Document, Error> {
    if title.trim().is_empty() {
        return Err(Error::Validation("document title is required".to_string()));
    }
    let document = models::Document {
        id: uuid::Uuid::new_v4(),
        title: title.to_string(),
        file_ref: file_ref.to_string(),
        uploaded_by: uploaded_by.to_string(),
        status: DocumentStatus::Uploaded,
        signer_id: None,
        created_at: chrono::Utc::now().naive_utc(),
    };
    store.insert_document(&document)?;
    Ok(document)
}

/// Attach a signer and replace the document's field set in one step,
/// moving the document to DRAFT. A signer may only have one unsigned
/// document at a time.
pub fn prepare<S: Store>(
    store: &S,
    document_id: uuid::Uuid,
    signer: &SignerSpec,
    fields: &[FieldSpec],
) -> Result<DocumentSnapshot, Error> {
    store
        .document(document_id)?
        .ok_or(Error::NotFound("document"))?;

    if signer.name.trim().is_empty() {
        return Err(Error::Validation("signer name is required".to_string()));
    }
    if !signer.email.contains('@') {
        return Err(Error::Validation(format!(
            "{} is not a valid email address",
            signer.email
        )));
    }
    for field in fields {
        if field.page < 1 {
            return Err(Error::Validation(format!(
                "field pages are 1-indexed, got {}",
                field.page
            )));
        }
    }

    let fields = fields
        .iter()
        .enumerate()
        .map(|(i, f)| models::Field {
            id: uuid::Uuid::new_v4(),
            document_id,
            field_type: f.field_type,
            field_order: i as i64,
            page: f.page,
            pos_x: f.x,
            pos_y: f.y,
            value: None,
        })
        .collect::<Vec<_>>();

    store.attach_signer_and_fields(document_id, &signer.name, &signer.email, &fields)?;
    snapshot(store, document_id)
}

/// Move the document to SENT, minting the signer's access token on first
/// send. Re-sending keeps the existing token valid.
pub fn send<S: Store>(
    store: &S,
    document_id: uuid::Uuid,
) -> Result<(models::Document, models::Signer), Error> {
    store
        .document(document_id)?
        .ok_or(Error::NotFound("document"))?;
    let candidate = signing::mint_signer_token();
    store.mark_sent(document_id, &candidate)
}

pub fn snapshot<S: Store>(
    store: &S,
    document_id: uuid::Uuid,
) -> Result<DocumentSnapshot, Error> {
    let document = store
        .document(document_id)?
        .ok_or(Error::NotFound("document"))?;
    let signer = match document.signer_id {
        Some(signer_id) => store.signer(signer_id)?,
        None => None,
    };
    let fields = store
        .document_fields(document_id)?
        .into_iter()
        .sorted_by_key(|f| f.field_order)
        .collect();
    Ok(DocumentSnapshot {
        document,
        signer,
        fields,
    })
}

/// Render the completed document and persist it next to the original. The
/// output name is stable, so repeated renders overwrite the same blob.
pub async fn render_signed(
    blobs: &files::BlobStore,
    snapshot: &DocumentSnapshot,
) -> Result<Vec<u8>, Error> {
    if snapshot.document.status != DocumentStatus::Signed {
        return Err(Error::InvalidState(format!(
            "cannot render a {} document",
            snapshot.document.status.to_string()
        )));
    }

    let original = blobs.retrieve(&snapshot.document.file_ref).await?;
    let placements = snapshot
        .fields
        .iter()
        .map(pdf::FieldPlacement::from)
        .collect::<Vec<_>>();
    let rendered = tokio::task::block_in_place(|| pdf::render(&original, &placements))?;

    blobs
        .store(&signed_file_name(snapshot.document.id), &rendered)
        .await?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures;
    use crate::schema::FieldType;
    use crate::store::mem::MemStore;
    use std::sync::Arc;

    fn uploaded(store: &MemStore) -> models::Document {
        upload(store, "Lease agreement", "alice@example.com", "original.pdf").unwrap()
    }

    fn jane() -> SignerSpec {
        SignerSpec {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
        }
    }

    fn two_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec {
                field_type: FieldType::Signature,
                page: 1,
                x: 50.0,
                y: 100.0,
            },
            FieldSpec {
                field_type: FieldType::Date,
                page: 1,
                x: 250.0,
                y: 100.0,
            },
        ]
    }

    fn sign_everything(store: &MemStore, document_id: uuid::Uuid) {
        let snap = snapshot(store, document_id).unwrap();
        let values = snap
            .fields
            .iter()
            .map(|f| {
                let value = match f.field_type {
                    FieldType::Signature => fixtures::tiny_png_data_uri(),
                    _ => "2026-08-30".to_string(),
                };
                (f.id, value)
            })
            .collect::<Vec<_>>();
        store.apply_submission(document_id, &values).unwrap();
    }

    #[test]
    fn upload_starts_in_uploaded_state() {
        let store = MemStore::default();
        let doc = uploaded(&store);
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert!(doc.signer_id.is_none());

        let snap = snapshot(&store, doc.id).unwrap();
        assert!(snap.signer.is_none());
        assert!(snap.fields.is_empty());
    }

    #[test]
    fn upload_rejects_blank_title() {
        let store = MemStore::default();
        let err = upload(&store, "  ", "alice@example.com", "x.pdf").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn prepare_attaches_signer_and_orders_fields() {
        let store = MemStore::default();
        let doc = uploaded(&store);

        let snap = prepare(&store, doc.id, &jane(), &two_fields()).unwrap();
        assert_eq!(snap.document.status, DocumentStatus::Draft);
        assert_eq!(snap.signer.as_ref().unwrap().email, "jane@example.com");
        assert_eq!(snap.fields.len(), 2);
        assert_eq!(snap.fields[0].field_order, 0);
        assert_eq!(snap.fields[0].field_type, FieldType::Signature);
        assert_eq!(snap.fields[1].field_order, 1);
        assert!(snap.fields.iter().all(|f| f.value.is_none()));
    }

    #[test]
    fn prepare_replaces_the_whole_field_set() {
        let store = MemStore::default();
        let doc = uploaded(&store);

        prepare(&store, doc.id, &jane(), &two_fields()).unwrap();
        let replacement = vec![FieldSpec {
            field_type: FieldType::Text,
            page: 1,
            x: 10.0,
            y: 20.0,
        }];
        let snap = prepare(&store, doc.id, &jane(), &replacement).unwrap();

        assert_eq!(snap.fields.len(), 1);
        assert_eq!(snap.fields[0].field_type, FieldType::Text);
    }

    #[test]
    fn prepare_rejects_zero_page() {
        let store = MemStore::default();
        let doc = uploaded(&store);
        let bad = vec![FieldSpec {
            field_type: FieldType::Text,
            page: 0,
            x: 0.0,
            y: 0.0,
        }];
        let err = prepare(&store, doc.id, &jane(), &bad).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn prepare_rejects_unknown_document() {
        let store = MemStore::default();
        let err = prepare(&store, uuid::Uuid::new_v4(), &jane(), &[]).unwrap_err();
        assert!(matches!(err, Error::NotFound("document")));
    }

    #[test]
    fn signer_with_pending_document_cannot_take_another() {
        let store = MemStore::default();
        let first = uploaded(&store);
        let second = uploaded(&store);

        prepare(&store, first.id, &jane(), &two_fields()).unwrap();
        let err = prepare(&store, second.id, &jane(), &two_fields()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn signer_is_reused_once_previous_document_is_signed() {
        let store = MemStore::default();
        let first = uploaded(&store);

        let snap = prepare(&store, first.id, &jane(), &two_fields()).unwrap();
        let first_signer = snap.signer.unwrap().id;
        send(&store, first.id).unwrap();
        sign_everything(&store, first.id);

        let second = uploaded(&store);
        let snap = prepare(&store, second.id, &jane(), &two_fields()).unwrap();
        assert_eq!(snap.signer.unwrap().id, first_signer);
    }

    #[test]
    fn send_requires_a_prepared_document() {
        let store = MemStore::default();
        let doc = uploaded(&store);
        let err = send(&store, doc.id).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn resend_keeps_the_original_token() {
        let store = MemStore::default();
        let doc = uploaded(&store);
        prepare(&store, doc.id, &jane(), &two_fields()).unwrap();

        let (sent, signer) = send(&store, doc.id).unwrap();
        assert_eq!(sent.status, DocumentStatus::Sent);
        let first_token = signer.token.unwrap();

        let (_, signer) = send(&store, doc.id).unwrap();
        assert_eq!(signer.token.unwrap(), first_token);
    }

    #[test]
    fn prepare_is_rejected_after_send() {
        let store = MemStore::default();
        let doc = uploaded(&store);
        prepare(&store, doc.id, &jane(), &two_fields()).unwrap();
        send(&store, doc.id).unwrap();

        let err = prepare(&store, doc.id, &jane(), &two_fields()).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn concurrent_submissions_of_one_document_have_a_single_winner() {
        let store = Arc::new(MemStore::default());
        let doc = uploaded(&store);
        prepare(&*store, doc.id, &jane(), &two_fields()).unwrap();
        send(&*store, doc.id).unwrap();

        let snap = snapshot(&*store, doc.id).unwrap();
        let values: Vec<_> = snap
            .fields
            .iter()
            .map(|f| (f.id, fixtures::tiny_png_data_uri()))
            .collect();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let values = values.clone();
                std::thread::spawn(move || store.apply_submission(doc.id, &values))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::InvalidState(_)))));
        let snap = snapshot(&*store, doc.id).unwrap();
        assert_eq!(snap.document.status, DocumentStatus::Signed);
    }

    #[test]
    fn concurrent_submissions_of_different_documents_both_succeed() {
        let store = Arc::new(MemStore::default());
        let mut targets = vec![];
        for email in ["a@example.com", "b@example.com"] {
            let doc = uploaded(&store);
            let signer = SignerSpec {
                name: "Signer".to_string(),
                email: email.to_string(),
            };
            prepare(&*store, doc.id, &signer, &two_fields()).unwrap();
            send(&*store, doc.id).unwrap();
            let values: Vec<_> = snapshot(&*store, doc.id)
                .unwrap()
                .fields
                .iter()
                .map(|f| (f.id, fixtures::tiny_png_data_uri()))
                .collect();
            targets.push((doc.id, values));
        }

        let handles: Vec<_> = targets
            .into_iter()
            .map(|(id, values)| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.apply_submission(id, &values))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn prepare_and_submission_on_one_document_never_interleave() {
        let store = Arc::new(MemStore::default());
        let doc = uploaded(&store);
        prepare(&*store, doc.id, &jane(), &two_fields()).unwrap();
        send(&*store, doc.id).unwrap();

        let values: Vec<_> = snapshot(&*store, doc.id)
            .unwrap()
            .fields
            .iter()
            .map(|f| (f.id, fixtures::tiny_png_data_uri()))
            .collect();

        let submit = {
            let store = Arc::clone(&store);
            let values = values.clone();
            std::thread::spawn(move || store.apply_submission(doc.id, &values))
        };
        let re_prepare = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || prepare(&*store, doc.id, &jane(), &two_fields()))
        };

        // A SENT document accepts values and rejects preparation; whichever
        // thread runs first, the submission is the only mutation that lands.
        submit.join().unwrap().unwrap();
        assert!(matches!(
            re_prepare.join().unwrap(),
            Err(Error::InvalidState(_))
        ));

        let snap = snapshot(&*store, doc.id).unwrap();
        assert_eq!(snap.document.status, DocumentStatus::Signed);
        assert_eq!(snap.fields.len(), 2);
        let submitted_ids: Vec<_> = values.iter().map(|(id, _)| *id).collect();
        assert!(snap.fields.iter().all(|f| submitted_ids.contains(&f.id)));
        assert!(snap.fields.iter().all(|f| f.value.is_some()));
    }

    #[test]
    fn concurrent_prepares_of_different_documents_both_succeed() {
        let store = Arc::new(MemStore::default());
        let first = uploaded(&store);
        let second = uploaded(&store);

        let handles: Vec<_> = [(first.id, "a@example.com"), (second.id, "b@example.com")]
            .into_iter()
            .map(|(id, email)| {
                let store = Arc::clone(&store);
                let signer = SignerSpec {
                    name: "Signer".to_string(),
                    email: email.to_string(),
                };
                std::thread::spawn(move || prepare(&*store, id, &signer, &two_fields()))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(
            snapshot(&*store, first.id).unwrap().document.status,
            DocumentStatus::Draft
        );
        assert_eq!(
            snapshot(&*store, second.id).unwrap().document.status,
            DocumentStatus::Draft
        );
    }

    #[test]
    fn racing_prepares_for_one_signer_have_a_single_winner() {
        let store = Arc::new(MemStore::default());
        let first = uploaded(&store);
        let second = uploaded(&store);

        let handles: Vec<_> = [first.id, second.id]
            .into_iter()
            .map(|id| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || prepare(&*store, id, &jane(), &two_fields()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::Validation(_)))));

        let statuses = [
            snapshot(&*store, first.id).unwrap().document.status,
            snapshot(&*store, second.id).unwrap().document.status,
        ];
        assert!(statuses.contains(&DocumentStatus::Draft));
        assert!(statuses.contains(&DocumentStatus::Uploaded));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn render_signed_persists_the_output() {
        let dir = std::env::temp_dir().join(format!("quillsign-test-{}", uuid::Uuid::new_v4()));
        let blobs = files::BlobStore::new(&dir);
        let store = MemStore::default();

        let doc = uploaded(&store);
        blobs
            .store(&doc.file_ref, &fixtures::blank_pdf(1))
            .await
            .unwrap();
        prepare(&store, doc.id, &jane(), &two_fields()).unwrap();
        send(&store, doc.id).unwrap();
        sign_everything(&store, doc.id);

        let snap = snapshot(&store, doc.id).unwrap();
        let rendered = render_signed(&blobs, &snap).await.unwrap();
        assert!(lopdf::Document::load_mem(&rendered).is_ok());

        let stored = blobs.retrieve(&signed_file_name(doc.id)).await.unwrap();
        assert_eq!(stored, rendered);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn render_signed_requires_signed_status() {
        let dir = std::env::temp_dir().join(format!("quillsign-test-{}", uuid::Uuid::new_v4()));
        let blobs = files::BlobStore::new(&dir);
        let store = MemStore::default();

        let doc = uploaded(&store);
        let snap = snapshot(&store, doc.id).unwrap();
        let err = render_signed(&blobs, &snap).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
