use crate::schema::*;

#[derive(Insertable, Queryable, Identifiable, AsChangeset, Serialize, Deserialize, Clone, Debug)]
#[table_name = "documents"]
pub struct Document {
    pub id: uuid::Uuid,
    pub title: String,
    pub file_ref: String,
    pub uploaded_by: String,
    pub status: DocumentStatus,
    pub signer_id: Option<uuid::Uuid>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Insertable, Queryable, Identifiable, AsChangeset, Serialize, Deserialize, Clone, Debug)]
#[table_name = "signers"]
pub struct Signer {
    pub id: uuid::Uuid,
    pub name: String,
    pub email: String,
    pub token: Option<String>,
}

#[derive(Insertable, Queryable, Identifiable, AsChangeset, Serialize, Deserialize, Clone, Debug)]
#[table_name = "fields"]
pub struct Field {
    pub id: uuid::Uuid,
    pub document_id: uuid::Uuid,
    pub field_type: FieldType,
    pub field_order: i64,
    pub page: i64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub value: Option<String>,
}
