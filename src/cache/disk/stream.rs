//! Stream factories: how entry files are written and read back.
//!
//! `PlainStreamFactory` stores bytes as they are. `EncryptedStreamFactory`
//! seals them with an AEAD cipher from `ring`. Encrypted files look like
//!
//! ```text
//! "RHC1" | alg id (1) | nonce prefix (8) | frame*
//! frame = ciphertext length (u32 BE) | ciphertext + tag
//! ```
//!
//! Each frame's nonce is the file's random prefix followed by the frame
//! counter. The additional data is the file header plus a flag marking the
//! final frame, so dropping trailing frames fails authentication.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::error::DiskCacheError;

const MAGIC: &[u8; 4] = b"RHC1";
const PREFIX_LEN: usize = 8;
const HEADER_LEN: usize = MAGIC.len() + 1 + PREFIX_LEN;
const FRAME_SIZE: usize = 64 * 1024;
pub const KEY_LEN: usize = 32;

/// Sequential writer of one file.
#[async_trait]
pub trait EntryWriter: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), DiskCacheError>;

    /// Flush and sync to disk; returns the file size.
    async fn finish(self: Box<Self>) -> Result<u64, DiskCacheError>;
}

#[async_trait]
pub trait StreamFactory: Send + Sync + fmt::Debug {
    async fn create(&self, path: &Path) -> Result<Box<dyn EntryWriter>, DiskCacheError>;

    async fn read(&self, path: &Path) -> Result<Bytes, DiskCacheError>;

    /// Write a whole buffer to `path`; returns the file size.
    async fn write_all(&self, path: &Path, data: &[u8]) -> Result<u64, DiskCacheError> {
        let mut writer = self.create(path).await?;
        writer.write(data).await?;
        writer.finish().await
    }
}

async fn open_file(path: &Path) -> Result<BufWriter<tokio::fs::File>, DiskCacheError> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    Ok(BufWriter::new(file))
}

async fn sync_file(mut file: BufWriter<tokio::fs::File>) -> Result<u64, DiskCacheError> {
    file.flush().await?;
    let file = file.into_inner();
    file.sync_all().await?;
    Ok(file.metadata().await?.len())
}

/// Files hold the body bytes unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainStreamFactory;

struct PlainWriter {
    file: BufWriter<tokio::fs::File>,
}

#[async_trait]
impl EntryWriter for PlainWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), DiskCacheError> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64, DiskCacheError> {
        sync_file(self.file).await
    }
}

#[async_trait]
impl StreamFactory for PlainStreamFactory {
    async fn create(&self, path: &Path) -> Result<Box<dyn EntryWriter>, DiskCacheError> {
        Ok(Box::new(PlainWriter {
            file: open_file(path).await?,
        }))
    }

    async fn read(&self, path: &Path) -> Result<Bytes, DiskCacheError> {
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }
}

/// Supported AEAD ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl EncryptionAlgorithm {
    fn id(self) -> u8 {
        match self {
            EncryptionAlgorithm::Aes256Gcm => 1,
            EncryptionAlgorithm::ChaCha20Poly1305 => 2,
        }
    }

    fn aead(self) -> &'static aead::Algorithm {
        match self {
            EncryptionAlgorithm::Aes256Gcm => &aead::AES_256_GCM,
            EncryptionAlgorithm::ChaCha20Poly1305 => &aead::CHACHA20_POLY1305,
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::Aes256Gcm => write!(f, "AES-256-GCM"),
            EncryptionAlgorithm::ChaCha20Poly1305 => write!(f, "CHACHA20-POLY1305"),
        }
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = DiskCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AES-256-GCM" | "AES256GCM" => Ok(EncryptionAlgorithm::Aes256Gcm),
            "CHACHA20-POLY1305" | "CHACHA20POLY1305" => Ok(EncryptionAlgorithm::ChaCha20Poly1305),
            other => Err(DiskCacheError::Config(format!(
                "unsupported encryption algorithm '{}'",
                other
            ))),
        }
    }
}

/// Files are sealed with a symmetric key.
pub struct EncryptedStreamFactory {
    algorithm: EncryptionAlgorithm,
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl fmt::Debug for EncryptedStreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedStreamFactory")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl EncryptedStreamFactory {
    /// Both algorithms take a 256-bit key.
    pub fn new(key: &[u8], algorithm: EncryptionAlgorithm) -> Result<Self, DiskCacheError> {
        if key.len() != KEY_LEN {
            return Err(DiskCacheError::Config(format!(
                "{} requires a {}-byte key, got {} bytes",
                algorithm,
                KEY_LEN,
                key.len()
            )));
        }
        let unbound = UnboundKey::new(algorithm.aead(), key)
            .map_err(|_| DiskCacheError::Config(format!("invalid {} key", algorithm)))?;
        Ok(Self {
            algorithm,
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }
}

fn nonce_for(prefix: &[u8; PREFIX_LEN], counter: u32) -> Nonce {
    let mut nonce = [0u8; aead::NONCE_LEN];
    nonce[..PREFIX_LEN].copy_from_slice(prefix);
    nonce[PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    Nonce::assume_unique_for_key(nonce)
}

fn frame_aad(header: &[u8; HEADER_LEN], last: bool) -> Aad<[u8; HEADER_LEN + 1]> {
    let mut aad = [0u8; HEADER_LEN + 1];
    aad[..HEADER_LEN].copy_from_slice(header);
    aad[HEADER_LEN] = u8::from(last);
    Aad::from(aad)
}

struct EncryptedWriter {
    file: BufWriter<tokio::fs::File>,
    key: Arc<LessSafeKey>,
    header: [u8; HEADER_LEN],
    prefix: [u8; PREFIX_LEN],
    counter: u32,
    pending: BytesMut,
}

impl EncryptedWriter {
    async fn seal_frame(&mut self, mut frame: Vec<u8>, last: bool) -> Result<(), DiskCacheError> {
        let nonce = nonce_for(&self.prefix, self.counter);
        self.key
            .seal_in_place_append_tag(nonce, frame_aad(&self.header, last), &mut frame)
            .map_err(|_| DiskCacheError::Crypto("seal failed".to_string()))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| DiskCacheError::Crypto("too many frames".to_string()))?;

        let len = u32::try_from(frame.len())
            .map_err(|_| DiskCacheError::Crypto("frame too large".to_string()))?;
        self.file.write_all(&len.to_be_bytes()).await?;
        self.file.write_all(&frame).await?;
        Ok(())
    }
}

#[async_trait]
impl EntryWriter for EncryptedWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), DiskCacheError> {
        self.pending.extend_from_slice(chunk);
        // Keep at least one byte back: whatever remains at finish is the last frame
        while self.pending.len() > FRAME_SIZE {
            let frame = self.pending.split_to(FRAME_SIZE).to_vec();
            self.seal_frame(frame, false).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64, DiskCacheError> {
        let mut this = *self;
        let frame = std::mem::take(&mut this.pending).to_vec();
        this.seal_frame(frame, true).await?;
        sync_file(this.file).await
    }
}

#[async_trait]
impl StreamFactory for EncryptedStreamFactory {
    async fn create(&self, path: &Path) -> Result<Box<dyn EntryWriter>, DiskCacheError> {
        let mut prefix = [0u8; PREFIX_LEN];
        self.rng
            .fill(&mut prefix)
            .map_err(|_| DiskCacheError::Crypto("random source unavailable".to_string()))?;

        let mut header = [0u8; HEADER_LEN];
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        header[MAGIC.len()] = self.algorithm.id();
        header[MAGIC.len() + 1..].copy_from_slice(&prefix);

        let mut file = open_file(path).await?;
        file.write_all(&header).await?;

        Ok(Box::new(EncryptedWriter {
            file,
            key: self.key.clone(),
            header,
            prefix,
            counter: 0,
            pending: BytesMut::new(),
        }))
    }

    async fn read(&self, path: &Path) -> Result<Bytes, DiskCacheError> {
        let data = tokio::fs::read(path).await?;
        if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
            return Err(DiskCacheError::Tampered);
        }
        if data[MAGIC.len()] != self.algorithm.id() {
            return Err(DiskCacheError::Crypto(format!(
                "file was not written with {}",
                self.algorithm
            )));
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&data[..HEADER_LEN]);
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&data[MAGIC.len() + 1..HEADER_LEN]);

        let mut plain = BytesMut::with_capacity(data.len());
        let mut rest = &data[HEADER_LEN..];
        let mut counter: u32 = 0;
        let mut saw_last = false;
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(DiskCacheError::Tampered);
            }
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if rest.len() < len {
                return Err(DiskCacheError::Tampered);
            }
            let mut frame = rest[..len].to_vec();
            rest = &rest[len..];

            let last = rest.is_empty();
            let opened = self
                .key
                .open_in_place(nonce_for(&prefix, counter), frame_aad(&header, last), &mut frame)
                .map_err(|_| DiskCacheError::Tampered)?;
            plain.extend_from_slice(opened);

            saw_last = last;
            counter = counter.checked_add(1).ok_or(DiskCacheError::Tampered)?;
        }

        if !saw_last {
            return Err(DiskCacheError::Tampered);
        }
        Ok(plain.freeze())
    }
}
