//! Encrypted database container.
//!
//! The container is a JSON document holding the KDF parameters, a salt, a
//! random data key wrapped by the key derived from the composite key, and the
//! serialized [`Database`] sealed under that data key.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{
    decode_blob, decrypt_with_key, derive_key_with_params, encrypt_with_key, random_bytes,
    CompositeKey, KdfParams, SealedBlob, KEY_LEN,
};
use crate::models::Database;

pub const CONTAINER_FORMAT_VERSION: u8 = 1;
pub const KDF_ALGORITHM: &str = "argon2id";
const KDF_SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("corrupt container: {0}")]
    Corrupt(String),
    #[error("unsupported container: {0}")]
    Unsupported(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Encodes and decodes a whole database to and from its encrypted byte form.
pub trait DatabaseFormat {
    fn load(&self, bytes: &[u8], key: &CompositeKey) -> Result<Database, FormatError>;
    fn save(&self, database: &Database, key: &CompositeKey) -> Result<Vec<u8>, FormatError>;
}

#[derive(Serialize, Deserialize)]
struct KdfSpec {
    algorithm: String,
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
}

#[derive(Serialize, Deserialize)]
struct ContainerFile {
    version: u8,
    kdf: KdfSpec,
    kdf_salt: String,
    wrapped_key: SealedBlob,
    payload: SealedBlob,
}

/// The default container: Argon2id key wrapping plus ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct VaultFormat {
    params: KdfParams,
}

impl VaultFormat {
    /// `params` are used when writing; reading always honours the header.
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }
}

fn open_blob(key: &[u8; KEY_LEN], blob: &SealedBlob) -> Result<Zeroizing<Vec<u8>>, FormatError> {
    let (nonce, data) = decode_blob(blob).map_err(|e| FormatError::Corrupt(e.to_string()))?;
    decrypt_with_key(key, &nonce, &data).map_err(|_| FormatError::InvalidCredentials)
}

impl DatabaseFormat for VaultFormat {
    fn load(&self, bytes: &[u8], key: &CompositeKey) -> Result<Database, FormatError> {
        let container: ContainerFile =
            serde_json::from_slice(bytes).map_err(|e| FormatError::Corrupt(e.to_string()))?;
        if container.version != CONTAINER_FORMAT_VERSION {
            return Err(FormatError::Unsupported(format!(
                "format version {}",
                container.version
            )));
        }
        if container.kdf.algorithm != KDF_ALGORITHM {
            return Err(FormatError::Unsupported(format!(
                "key derivation '{}'",
                container.kdf.algorithm
            )));
        }
        let params = KdfParams {
            m_cost: container.kdf.m_cost,
            t_cost: container.kdf.t_cost,
            p_cost: container.kdf.p_cost,
        };
        if !params.is_supported() {
            return Err(FormatError::Unsupported(format!(
                "key derivation parameters {params:?}"
            )));
        }
        let salt = base64::engine::general_purpose::STANDARD
            .decode(&container.kdf_salt)
            .map_err(|e| FormatError::Corrupt(format!("salt encoding: {e}")))?;

        let kek = derive_key_with_params(key.as_bytes(), &salt, params)
            .map_err(|e| FormatError::Corrupt(e.to_string()))?;
        let dek = open_blob(&kek, &container.wrapped_key)?;
        let dek: [u8; KEY_LEN] = dek
            .as_slice()
            .try_into()
            .map_err(|_| FormatError::Corrupt("wrapped key length".into()))?;
        let dek = Zeroizing::new(dek);

        // Authentication succeeded under the data key, so a failure past this
        // point means the payload itself is damaged.
        let plaintext = open_blob(&dek, &container.payload)
            .map_err(|_| FormatError::Corrupt("payload authentication".into()))?;
        serde_json::from_slice(&plaintext).map_err(|e| FormatError::Corrupt(e.to_string()))
    }

    fn save(&self, database: &Database, key: &CompositeKey) -> Result<Vec<u8>, FormatError> {
        let salt = random_bytes::<KDF_SALT_LEN>();
        let kek = derive_key_with_params(key.as_bytes(), &salt, self.params)
            .map_err(|e| FormatError::Encode(e.to_string()))?;
        let dek = Zeroizing::new(random_bytes::<KEY_LEN>());

        let wrapped_key =
            encrypt_with_key(&kek, &dek[..]).map_err(|e| FormatError::Encode(e.to_string()))?;
        let plaintext = Zeroizing::new(
            serde_json::to_vec(database).map_err(|e| FormatError::Encode(e.to_string()))?,
        );
        let payload =
            encrypt_with_key(&dek, &plaintext).map_err(|e| FormatError::Encode(e.to_string()))?;

        let container = ContainerFile {
            version: CONTAINER_FORMAT_VERSION,
            kdf: KdfSpec {
                algorithm: KDF_ALGORITHM.to_string(),
                m_cost: self.params.m_cost,
                t_cost: self.params.t_cost,
                p_cost: self.params.p_cost,
            },
            kdf_salt: base64::engine::general_purpose::STANDARD.encode(salt),
            wrapped_key,
            payload,
        };
        serde_json::to_vec_pretty(&container).map_err(|e| FormatError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entry, FieldValue, FIELD_PASSWORD, FIELD_TITLE};

    fn fast() -> VaultFormat {
        VaultFormat::new(KdfParams {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        })
    }

    fn sample() -> Database {
        let mut db = Database::create("Vault");
        let mut entry = Entry::new();
        entry.set_field(FIELD_TITLE, FieldValue::plain("Bank"));
        entry.set_field(FIELD_PASSWORD, FieldValue::protected("pin-1234"));
        db.root.entries.push(entry);
        db
    }

    #[test]
    fn load_restores_saved_database() {
        let key = CompositeKey::new("passphrase", None);
        let db = sample();
        let bytes = fast().save(&db, &key).unwrap();
        let loaded = fast().load(&bytes, &key).unwrap();
        assert_eq!(loaded, db);
        assert!(loaded.root.entries[0].field(FIELD_PASSWORD).unwrap().is_protected());
    }

    #[test]
    fn wrong_passphrase_is_invalid_credentials() {
        let bytes = fast().save(&sample(), &CompositeKey::new("right", None)).unwrap();
        let err = fast()
            .load(&bytes, &CompositeKey::new("wrong", None))
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidCredentials));
    }

    #[test]
    fn missing_key_file_is_invalid_credentials() {
        let key = CompositeKey::new("pw", Some(b"keyfile".as_slice()));
        let bytes = fast().save(&sample(), &key).unwrap();
        let err = fast().load(&bytes, &CompositeKey::new("pw", None)).unwrap_err();
        assert!(matches!(err, FormatError::InvalidCredentials));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = fast()
            .load(b"not a container", &CompositeKey::new("pw", None))
            .unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }

    #[test]
    fn header_parameters_win_over_reader_parameters() {
        let key = CompositeKey::new("pw", None);
        let bytes = fast().save(&sample(), &key).unwrap();
        let reader = VaultFormat::new(KdfParams {
            m_cost: 16,
            t_cost: 2,
            p_cost: 1,
        });
        assert!(reader.load(&bytes, &key).is_ok());
    }

    #[test]
    fn unknown_kdf_is_unsupported() {
        let key = CompositeKey::new("pw", None);
        let bytes = fast().save(&sample(), &key).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["kdf"]["algorithm"] = serde_json::json!("aes-kdf");
        let tampered = serde_json::to_vec(&value).unwrap();
        let err = fast().load(&tampered, &key).unwrap_err();
        assert!(matches!(err, FormatError::Unsupported(_)));
    }
}
