#![crate_type = "rlib"]

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate diesel_derive_enum;
#[macro_use]
extern crate diesel_migrations;
#[macro_use]
extern crate lopdf;
#[macro_use]
extern crate log;

use rocket_sync_db_pools::database;
use rocket_sync_db_pools::Poolable;

pub mod schema;
pub mod models;
mod error;
pub mod pdf;
pub mod store;
pub mod documents;
pub mod signing;
pub mod files;
pub mod notify;
pub mod views;

pub use error::Error;

#[database("db")]
pub struct DbConn(diesel::PgConnection);

embed_migrations!("./migrations");

/// Public object identifiers carry a type prefix so they can't be mixed up
/// across endpoints.
macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub uuid: uuid::Uuid,
        }

        impl $name {
            pub fn new(uuid: uuid::Uuid) -> Self {
                Self { uuid }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    uuid: uuid::Uuid::new_v4(),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_fmt(format_args!(
                    "{}_{}",
                    $prefix,
                    self.uuid.to_simple().encode_lower(&mut uuid::Uuid::encode_buffer())
                ))
            }
        }

        impl<'a> rocket::request::FromParam<'a> for $name {
            type Error = &'static str;

            fn from_param(param: &'a str) -> Result<Self, Self::Error> {
                match uuid::Uuid::parse_str(
                    param.strip_prefix(concat!($prefix, "_")).unwrap_or(param),
                ) {
                    Ok(id) => Ok($name { uuid: id }),
                    Err(_) => Err("invalid ID"),
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }
    };
}

prefixed_id!(DocumentId, "doc");
prefixed_id!(SignerId, "signer");
prefixed_id!(FieldId, "field");

#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "default_files_dir")]
    pub files_dir: std::path::PathBuf,
    pub external_uri: String,
    pub smtp: SMTPConfig,
}

fn default_files_dir() -> std::path::PathBuf {
    "./files/".into()
}

#[derive(Deserialize, Clone)]
pub struct SMTPConfig {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub from: String,
    pub auth: Option<SMTPAuth>,
}

#[derive(Deserialize, Clone)]
pub struct SMTPAuth {
    pub username: String,
    pub password: String,
}

pub struct App {
    pub rocket: rocket::Rocket<rocket::Build>,
    pub smtp_conf: SMTPConfig,
    pub external_uri: String,
    pub files_dir: std::path::PathBuf,
}

pub async fn setup() -> App {
    let rocket = rocket::build();
    let figment = rocket.figment();
    let config = figment.extract::<Config>().expect("Unable to read config");

    let db_pool = diesel::PgConnection::pool("db", &rocket).unwrap();
    embedded_migrations::run_with_output(&db_pool.get().unwrap(), &mut std::io::stdout()).unwrap();

    App {
        smtp_conf: config.smtp.clone(),
        external_uri: config.external_uri.clone(),
        files_dir: config.files_dir.clone(),
        rocket: rocket.manage(config),
    }
}
