//! Automation keypair generation.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};

const KEY_TYPE: &str = "ssh-ed25519";
const PEM_LABEL: &str = "PRIVATE KEY";

/// Generated keypair in the text forms stored on a managed server.
#[derive(Clone)]
pub struct SshKeyPair {
    /// `ssh-ed25519 <base64> <comment>`
    pub public_openssh: String,
    /// PKCS#8 PEM
    pub private_pem: String,
}

impl std::fmt::Debug for SshKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshKeyPair")
            .field("public_openssh", &self.public_openssh)
            .field("private_pem", &"[REDACTED]")
            .finish()
    }
}

impl SshKeyPair {
    /// Generate a fresh Ed25519 keypair. `comment` ends up after the key
    /// in authorized_keys, e.g. `alice@manager.example.com`.
    pub fn generate(comment: &str) -> anyhow::Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| anyhow::anyhow!("failed to generate Ed25519 key"))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| anyhow::anyhow!("generated key rejected: {}", e))?;

        Ok(Self {
            public_openssh: openssh_public_key(pair.public_key().as_ref(), comment),
            private_pem: pem_encode(PEM_LABEL, pkcs8.as_ref()),
        })
    }
}

fn openssh_public_key(public: &[u8], comment: &str) -> String {
    let mut blob = Vec::with_capacity(4 + KEY_TYPE.len() + 4 + public.len());
    push_ssh_string(&mut blob, KEY_TYPE.as_bytes());
    push_ssh_string(&mut blob, public);
    format!("{} {} {}", KEY_TYPE, BASE64.encode(blob), comment)
}

fn push_ssh_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn pem_encode(label: &str, der: &[u8]) -> String {
    let body = BASE64.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    // base64 output is ASCII, so byte chunks are valid str slices
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}
