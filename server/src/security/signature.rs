use std::collections::HashMap;
use std::fs;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey};
use thiserror::Error;

use crate::server::SimpleResult;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("unreadable token header: {0}")]
    Header(String),

    #[error("unsupported algorithm {0:?}")]
    Algorithm(Algorithm),

    #[error("no public key for kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("signature does not match")]
    Mismatch,

    #[error("signature check failed: {0}")]
    Crypto(String),
}

/// Issuer public keys by key id, used to check RS256 token signatures.
///
/// Keys are held as PEM text and parsed per check; the set is validated
/// once at load time so a bad file fails startup rather than requests.
pub struct KeySet {
    keys: HashMap<String, Vec<u8>>,
}

impl KeySet {
    /// Read a JSON object of `{ "<kid>": "<PEM public key>" }` from disk.
    pub fn load(path: &Path) -> SimpleResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|err| format!("Can not read key file {:?}: {}", path, err))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> SimpleResult<Self> {
        let raw: HashMap<String, String> =
            serde_json::from_str(json).map_err(|err| format!("Can not parse key file: {}", err))?;
        if raw.is_empty() {
            return Err("Key file contains no keys".to_string());
        }

        let mut keys = HashMap::with_capacity(raw.len());
        for (kid, pem) in raw {
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|err| format!("Key {:?} is not an RSA public key: {}", kid, err))?;
            keys.insert(kid, pem.into_bytes());
        }
        Ok(KeySet { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check the token's signature with the key named by its `kid` header.
    pub fn verify(&self, token: &str) -> Result<(), SignatureError> {
        let header = jsonwebtoken::decode_header(token).map_err(|err| SignatureError::Header(err.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(SignatureError::Algorithm(header.alg));
        }

        let pem = header
            .kid
            .as_ref()
            .and_then(|kid| self.keys.get(kid))
            .ok_or_else(|| SignatureError::UnknownKey(header.kid.clone()))?;
        let key = DecodingKey::from_rsa_pem(pem).map_err(|err| SignatureError::Crypto(err.to_string()))?;

        let (message, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| SignatureError::Header("missing signature segment".to_string()))?;
        match jsonwebtoken::crypto::verify(signature, message, &key, Algorithm::RS256) {
            Ok(true) => Ok(()),
            Ok(false) => Err(SignatureError::Mismatch),
            Err(err) => Err(SignatureError::Crypto(err.to_string())),
        }
    }
}
