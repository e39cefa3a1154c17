#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Draft,
    Sent,
    Signed,
}

impl ToString for DocumentStatus {
    fn to_string(&self) -> String {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Draft => "DRAFT",
            Self::Sent => "SENT",
            Self::Signed => "SIGNED",
        }
        .to_string()
    }
}

#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Signature,
    Text,
    Date,
    Initials,
}

impl ToString for FieldType {
    fn to_string(&self) -> String {
        match self {
            Self::Signature => "SIGNATURE",
            Self::Text => "TEXT",
            Self::Date => "DATE",
            Self::Initials => "INITIALS",
        }
        .to_string()
    }
}

table! {
    documents (id) {
        id -> Uuid,
        title -> Varchar,
        file_ref -> Varchar,
        uploaded_by -> Varchar,
        status -> crate::schema::DocumentStatusMapping,
        signer_id -> Nullable<Uuid>,
        created_at -> Timestamp,
    }
}

table! {
    signers (id) {
        id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        token -> Nullable<Varchar>,
    }
}

table! {
    fields (id) {
        id -> Uuid,
        document_id -> Uuid,
        field_type -> crate::schema::FieldTypeMapping,
        field_order -> Int8,
        page -> Int8,
        pos_x -> Float8,
        pos_y -> Float8,
        value -> Nullable<Varchar>,
    }
}

joinable!(documents -> signers (signer_id));
joinable!(fields -> documents (document_id));

allow_tables_to_appear_in_same_query!(documents, signers, fields);
