//! Already-issued TLS material
//!
//! Files are only ever read here; issuing and rotating certificates is the
//! certificate provider's job.

use crate::common::{Result, TlsConfig};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsFile {
    Ca,
    ServerCert,
    ServerKey,
    ClientCert,
    ClientKey,
}

impl TlsFile {
    pub const ALL: [TlsFile; 5] = [
        TlsFile::Ca,
        TlsFile::ServerCert,
        TlsFile::ServerKey,
        TlsFile::ClientCert,
        TlsFile::ClientKey,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    paths: TlsConfig,
}

impl TlsMaterial {
    pub fn new(paths: TlsConfig) -> Self {
        Self { paths }
    }

    pub fn path(&self, file: TlsFile) -> &Path {
        match file {
            TlsFile::Ca => &self.paths.ca,
            TlsFile::ServerCert => &self.paths.server_cert,
            TlsFile::ServerKey => &self.paths.server_key,
            TlsFile::ClientCert => &self.paths.client_cert,
            TlsFile::ClientKey => &self.paths.client_key,
        }
    }

    /// Ready once every file has been written.
    pub fn is_ready(&self) -> bool {
        TlsFile::ALL.iter().all(|f| self.path(*f).is_file())
    }

    pub fn read(&self, file: TlsFile) -> Result<String> {
        Ok(std::fs::read_to_string(self.path(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(dir: &Path) -> TlsConfig {
        TlsConfig {
            ca: dir.join("ca.crt"),
            server_cert: dir.join("server.crt"),
            server_key: dir.join("server.key"),
            client_cert: dir.join("client.crt"),
            client_key: dir.join("client.key"),
        }
    }

    #[test]
    fn test_ready_only_when_all_files_exist() {
        let dir = TempDir::new().unwrap();
        let tls = TlsMaterial::new(paths(dir.path()));
        assert!(!tls.is_ready());

        for file in &TlsFile::ALL[..4] {
            std::fs::write(tls.path(*file), "pem").unwrap();
        }
        assert!(!tls.is_ready());

        std::fs::write(tls.path(TlsFile::ClientKey), "key").unwrap();
        assert!(tls.is_ready());
        assert_eq!(tls.read(TlsFile::ClientKey).unwrap(), "key");
    }
}
