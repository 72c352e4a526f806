//! TLS client credential materialization.
//!
//! The engine references credentials by filesystem path or by hardware token
//! id. Inline material therefore gets staged into owner-only temp files
//! whose lifetime is tied to the client that wrote them; token-backed roles
//! are recorded as identifiers and re-applied on every handle build, because
//! generic handle duplication does not carry engine-backed key state.

use std::io::Write;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};

use curl::easy::{Easy2, Handler};
use tempfile::NamedTempFile;

use crate::error::HttpError;

/// One credential role's source.
#[derive(Debug, Clone)]
pub enum Credential {
    /// PEM file already on disk.
    File(PathBuf),
    /// PEM bytes to stage into a temp file.
    Data(Vec<u8>),
    /// PKCS#11 object reference resolved by the engine's TLS layer.
    Pkcs11(String),
}

/// CA bundle, client certificate and private key for mutual TLS.
#[derive(Debug, Clone)]
pub struct TlsCredentials {
    pub ca: Credential,
    pub cert: Credential,
    pub key: Credential,
}

/// A file-backed role: either the caller's own path or a staged temp file
/// that is unlinked when this value drops.
#[derive(Debug)]
struct FileMaterial {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

#[derive(Debug)]
enum RoleMaterial {
    File(FileMaterial),
    Token(String),
}

/// Materialized credentials plus the sources they came from.
///
/// The sources are kept so a client copy can stage its own temp files
/// instead of sharing these; staged files are never shared between clients.
#[derive(Debug)]
pub(crate) struct TlsMaterial {
    source: TlsCredentials,
    ca: FileMaterial,
    cert: RoleMaterial,
    key: RoleMaterial,
}

impl TlsMaterial {
    /// Resolve each role independently, staging inline bytes to owner-only
    /// temp files. The CA must be file-backed; cert and key may instead name
    /// a PKCS#11 object.
    pub(crate) fn materialize(creds: &TlsCredentials) -> Result<Self, HttpError> {
        let ca = materialize_file(&creds.ca)?;
        let cert = materialize_role(&creds.cert)?;
        let key = materialize_role(&creds.key)?;
        Ok(Self {
            source: creds.clone(),
            ca,
            cert,
            key,
        })
    }

    pub(crate) fn source(&self) -> &TlsCredentials {
        &self.source
    }

    /// True when cert or key lives on a hardware token.
    pub(crate) fn uses_token(&self) -> bool {
        matches!(self.cert, RoleMaterial::Token(_)) || matches!(self.key, RoleMaterial::Token(_))
    }

    /// Point a handle at these credentials and enable peer verification.
    pub(crate) fn apply<H: Handler>(&self, handle: &mut Easy2<H>) -> Result<(), HttpError> {
        handle.ssl_verify_peer(true)?;
        handle.ssl_verify_host(true)?;
        handle.cainfo(&self.ca.path)?;
        match &self.cert {
            RoleMaterial::File(f) => {
                handle.ssl_cert_type("PEM")?;
                handle.ssl_cert(&f.path)?;
            }
            RoleMaterial::Token(id) => {
                select_pkcs11_engine(handle)?;
                handle.ssl_cert_type("ENG")?;
                handle.ssl_cert(Path::new(id))?;
            }
        }
        match &self.key {
            RoleMaterial::File(f) => {
                handle.ssl_key_type("PEM")?;
                handle.ssl_key(&f.path)?;
            }
            RoleMaterial::Token(id) => {
                select_pkcs11_engine(handle)?;
                handle.ssl_key_type("ENG")?;
                handle.ssl_key(Path::new(id))?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn staged_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.ca._temp.is_some() {
            paths.push(self.ca.path.clone());
        }
        for role in [&self.cert, &self.key] {
            if let RoleMaterial::File(f) = role {
                if f._temp.is_some() {
                    paths.push(f.path.clone());
                }
            }
        }
        paths
    }
}

fn materialize_role(cred: &Credential) -> Result<RoleMaterial, HttpError> {
    match cred {
        Credential::Pkcs11(id) => {
            if id.contains('\0') {
                return Err(HttpError::TokenId(id.clone()));
            }
            Ok(RoleMaterial::Token(id.clone()))
        }
        other => Ok(RoleMaterial::File(materialize_file(other)?)),
    }
}

fn materialize_file(cred: &Credential) -> Result<FileMaterial, HttpError> {
    match cred {
        Credential::File(path) => Ok(FileMaterial {
            path: path.clone(),
            _temp: None,
        }),
        Credential::Data(bytes) => {
            // NamedTempFile is created 0600 on Unix, so the key material is
            // readable by the agent only.
            let mut temp = NamedTempFile::new()?;
            temp.write_all(bytes)?;
            temp.flush()?;
            let path = temp.path().to_path_buf();
            tracing::debug!("staged inline credential at {}", path.display());
            Ok(FileMaterial {
                path,
                _temp: Some(temp),
            })
        }
        Credential::Pkcs11(_) => Err(HttpError::CaOnToken),
    }
}

/// Select the `pkcs11` TLS engine on a handle. The safe wrapper has no
/// binding for this option, so it goes through the raw handle.
fn select_pkcs11_engine<H: Handler>(handle: &Easy2<H>) -> Result<(), HttpError> {
    static ENGINE_NAME: &[u8] = b"pkcs11\0";
    let rc = unsafe {
        curl_sys::curl_easy_setopt(
            handle.raw(),
            curl_sys::CURLOPT_SSLENGINE,
            ENGINE_NAME.as_ptr() as *const c_void,
        )
    };
    if rc != curl_sys::CURLE_OK {
        return Err(HttpError::Engine(curl::Error::new(rc)));
    }
    Ok(())
}
