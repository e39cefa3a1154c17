use crate::schema::DocumentStatus;
use crate::{models, schema, Error};
use diesel::prelude::*;

/// Storage collaborator. Reads are individually consistent; the multi-record
/// mutations at the bottom are atomic and hold a per-document lock for their
/// whole duration.
pub trait Store {
    fn document(&self, id: uuid::Uuid) -> Result<Option<models::Document>, Error>;
    fn documents(&self) -> Result<Vec<models::Document>, Error>;
    fn insert_document(&self, document: &models::Document) -> Result<(), Error>;

    fn signer(&self, id: uuid::Uuid) -> Result<Option<models::Signer>, Error>;
    fn signer_by_token(&self, token: &str) -> Result<Option<models::Signer>, Error>;

    /// Fields of a document, in their stored draw order.
    fn document_fields(&self, document_id: uuid::Uuid) -> Result<Vec<models::Field>, Error>;
    /// Documents referencing a signer, oldest first.
    fn documents_for_signer(&self, signer_id: uuid::Uuid) -> Result<Vec<models::Document>, Error>;

    /// Find or create the signer by exact email, attach them, replace the
    /// complete field set and move the document to DRAFT, all-or-nothing.
    /// Only valid from UPLOADED or DRAFT. A signer with another unsigned
    /// document is rejected with Validation; the check runs inside the same
    /// atomic unit as the attach, so racing prepares have a single winner.
    fn attach_signer_and_fields(
        &self,
        document_id: uuid::Uuid,
        signer_name: &str,
        signer_email: &str,
        fields: &[models::Field],
    ) -> Result<models::Signer, Error>;

    /// Move the document to SENT, assigning `candidate_token` to its signer
    /// unless one was already minted. Returns the document and signer as
    /// committed; the signer's token is always populated on success.
    fn mark_sent(
        &self,
        document_id: uuid::Uuid,
        candidate_token: &str,
    ) -> Result<(models::Document, models::Signer), Error>;

    /// Persist submitted field values and move the document to SIGNED,
    /// all-or-nothing. Every value must reference a field of this document.
    /// Only valid from SENT.
    fn apply_submission(
        &self,
        document_id: uuid::Uuid,
        values: &[(uuid::Uuid, String)],
    ) -> Result<(), Error>;
}

fn busy_signer(email: &str) -> Error {
    Error::Validation(format!(
        "{} already has a document awaiting signature",
        email
    ))
}

/// The partial unique index on unsigned documents surfaces racing attaches
/// as unique violations; report them the same way as the in-transaction
/// check.
fn signer_conflict(email: &str, err: diesel::result::Error) -> Error {
    match err {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => busy_signer(email),
        other => other.into(),
    }
}

pub struct PgStore<'a> {
    conn: &'a diesel::PgConnection,
}

impl<'a> PgStore<'a> {
    pub fn new(conn: &'a diesel::PgConnection) -> Self {
        Self { conn }
    }

    fn locked_document(&self, id: uuid::Uuid) -> Result<models::Document, Error> {
        schema::documents::dsl::documents
            .find(id)
            .for_update()
            .first::<models::Document>(self.conn)
            .optional()?
            .ok_or(Error::NotFound("document"))
    }
}

impl Store for PgStore<'_> {
    fn document(&self, id: uuid::Uuid) -> Result<Option<models::Document>, Error> {
        Ok(schema::documents::dsl::documents
            .find(id)
            .first::<models::Document>(self.conn)
            .optional()?)
    }

    fn documents(&self) -> Result<Vec<models::Document>, Error> {
        Ok(schema::documents::dsl::documents
            .order_by(schema::documents::dsl::created_at.desc())
            .load::<models::Document>(self.conn)?)
    }

    fn insert_document(&self, document: &models::Document) -> Result<(), Error> {
        diesel::insert_into(schema::documents::dsl::documents)
            .values(document)
            .execute(self.conn)?;
        Ok(())
    }

    fn signer(&self, id: uuid::Uuid) -> Result<Option<models::Signer>, Error> {
        Ok(schema::signers::dsl::signers
            .find(id)
            .first::<models::Signer>(self.conn)
            .optional()?)
    }

    fn signer_by_token(&self, token: &str) -> Result<Option<models::Signer>, Error> {
        Ok(schema::signers::dsl::signers
            .filter(schema::signers::dsl::token.eq(token))
            .first::<models::Signer>(self.conn)
            .optional()?)
    }

    fn document_fields(&self, document_id: uuid::Uuid) -> Result<Vec<models::Field>, Error> {
        Ok(schema::fields::dsl::fields
            .filter(schema::fields::dsl::document_id.eq(document_id))
            .order_by(schema::fields::dsl::field_order.asc())
            .load::<models::Field>(self.conn)?)
    }

    fn documents_for_signer(&self, signer_id: uuid::Uuid) -> Result<Vec<models::Document>, Error> {
        Ok(schema::documents::dsl::documents
            .filter(schema::documents::dsl::signer_id.eq(signer_id))
            .order_by(schema::documents::dsl::created_at.asc())
            .load::<models::Document>(self.conn)?)
    }

    fn attach_signer_and_fields(
        &self,
        document_id: uuid::Uuid,
        signer_name: &str,
        signer_email: &str,
        fields: &[models::Field],
    ) -> Result<models::Signer, Error> {
        self.conn.transaction::<_, Error, _>(|| {
            let doc = self.locked_document(document_id)?;
            match doc.status {
                DocumentStatus::Uploaded | DocumentStatus::Draft => {}
                s => return Err(Error::InvalidState(format!("cannot prepare a {} document", s.to_string()))),
            }

            let signer = match schema::signers::dsl::signers
                .filter(schema::signers::dsl::email.eq(signer_email))
                .for_update()
                .first::<models::Signer>(self.conn)
                .optional()?
            {
                Some(signer) => {
                    let pending = schema::documents::dsl::documents
                        .filter(schema::documents::dsl::signer_id.eq(signer.id))
                        .filter(schema::documents::dsl::id.ne(document_id))
                        .filter(schema::documents::dsl::status.ne(DocumentStatus::Signed))
                        .count()
                        .get_result::<i64>(self.conn)?;
                    if pending > 0 {
                        return Err(busy_signer(signer_email));
                    }
                    signer
                }
                None => {
                    let signer = models::Signer {
                        id: uuid::Uuid::new_v4(),
                        name: signer_name.to_string(),
                        email: signer_email.to_string(),
                        token: None,
                    };
                    diesel::insert_into(schema::signers::dsl::signers)
                        .values(&signer)
                        .execute(self.conn)
                        .map_err(|err| signer_conflict(signer_email, err))?;
                    signer
                }
            };

            diesel::delete(
                schema::fields::dsl::fields.filter(schema::fields::dsl::document_id.eq(document_id)),
            )
            .execute(self.conn)?;
            diesel::insert_into(schema::fields::dsl::fields)
                .values(fields)
                .execute(self.conn)?;
            diesel::update(schema::documents::dsl::documents.find(document_id))
                .set((
                    schema::documents::dsl::signer_id.eq(Some(signer.id)),
                    schema::documents::dsl::status.eq(DocumentStatus::Draft),
                ))
                .execute(self.conn)
                .map_err(|err| signer_conflict(signer_email, err))?;
            Ok(signer)
        })
    }

    fn mark_sent(
        &self,
        document_id: uuid::Uuid,
        candidate_token: &str,
    ) -> Result<(models::Document, models::Signer), Error> {
        self.conn.transaction::<_, Error, _>(|| {
            let mut doc = self.locked_document(document_id)?;
            let signer_id = doc
                .signer_id
                .ok_or_else(|| Error::InvalidState("document has no signer".to_string()))?;
            match doc.status {
                DocumentStatus::Draft | DocumentStatus::Sent => {}
                s => return Err(Error::InvalidState(format!("cannot send a {} document", s.to_string()))),
            }

            let mut signer = schema::signers::dsl::signers
                .find(signer_id)
                .first::<models::Signer>(self.conn)?;
            if signer.token.is_none() {
                diesel::update(schema::signers::dsl::signers.find(signer_id))
                    .set(schema::signers::dsl::token.eq(candidate_token))
                    .execute(self.conn)?;
                signer.token = Some(candidate_token.to_string());
            }

            diesel::update(schema::documents::dsl::documents.find(document_id))
                .set(schema::documents::dsl::status.eq(DocumentStatus::Sent))
                .execute(self.conn)?;
            doc.status = DocumentStatus::Sent;

            Ok((doc, signer))
        })
    }

    fn apply_submission(
        &self,
        document_id: uuid::Uuid,
        values: &[(uuid::Uuid, String)],
    ) -> Result<(), Error> {
        self.conn.transaction::<_, Error, _>(|| {
            let doc = self.locked_document(document_id)?;
            if doc.status != DocumentStatus::Sent {
                return Err(Error::InvalidState(format!(
                    "cannot accept values for a {} document",
                    doc.status.to_string()
                )));
            }

            for (field_id, value) in values {
                let updated = diesel::update(
                    schema::fields::dsl::fields
                        .find(*field_id)
                        .filter(schema::fields::dsl::document_id.eq(document_id)),
                )
                .set(schema::fields::dsl::value.eq(value.as_str()))
                .execute(self.conn)?;
                if updated == 0 {
                    return Err(Error::NotFound("field"));
                }
            }

            diesel::update(schema::documents::dsl::documents.find(document_id))
                .set(schema::documents::dsl::status.eq(DocumentStatus::Signed))
                .execute(self.conn)?;
            Ok(())
        })
    }
}


#[cfg(test)]
mod tests {
    use super::mem::MemStore;
    use super::*;

    fn insert_uploaded(store: &MemStore) -> models::Document {
        let document = models::Document {
            id: uuid::Uuid::new_v4(),
            title: "Lease agreement".to_string(),
            file_ref: "original.pdf".to_string(),
            uploaded_by: "alice@example.com".to_string(),
            status: DocumentStatus::Uploaded,
            signer_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        };
        store.insert_document(&document).unwrap();
        document
    }

    #[test]
    fn attach_rejects_a_second_unsigned_document_for_one_email() {
        let store = MemStore::default();
        let first = insert_uploaded(&store);
        let second = insert_uploaded(&store);

        store
            .attach_signer_and_fields(first.id, "Jane Doe", "jane@example.com", &[])
            .unwrap();
        let err = store
            .attach_signer_and_fields(second.id, "Jane Doe", "jane@example.com", &[])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let second = store.document(second.id).unwrap().unwrap();
        assert_eq!(second.status, DocumentStatus::Uploaded);
        assert!(second.signer_id.is_none());
    }

    #[test]
    fn attach_is_repeatable_on_the_same_document() {
        let store = MemStore::default();
        let doc = insert_uploaded(&store);

        let first = store
            .attach_signer_and_fields(doc.id, "Jane Doe", "jane@example.com", &[])
            .unwrap();
        let second = store
            .attach_signer_and_fields(doc.id, "Jane Doe", "jane@example.com", &[])
            .unwrap();
        assert_eq!(first.id, second.id);
    }
}
