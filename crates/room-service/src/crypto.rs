//! Cryptographic helpers: random tokens, password hashing and backend
//! request signing.

use crate::errors::RoomError;
use common::secret::{ExposeSecret, SecretString};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::instrument;

/// Length of a conversation token.
pub const CONVERSATION_TOKEN_LENGTH: usize = 8;

/// Bytes of entropy behind access tokens and signing nonces.
pub const TOKEN_BYTES: usize = 32;

/// Minimum bcrypt cost accepted for join passwords.
pub const MIN_BCRYPT_COST: u32 = 10;

/// Maximum bcrypt cost accepted for join passwords.
pub const MAX_BCRYPT_COST: u32 = 14;

/// Default bcrypt cost for join passwords.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Lowercase letters and digits, minus look-alikes.
const TOKEN_ALPHABET: &[u8] = b"abcdefghijkmnopqrstuvwxyz23456789";

/// Generate cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, RoomError> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|e| RoomError::Internal(format!("Random bytes generation failed: {e}")))?;
    Ok(bytes)
}

/// Hex encoding of `len` random bytes.
pub fn random_hex(len: usize) -> Result<String, RoomError> {
    Ok(hex::encode(random_bytes(len)?))
}

/// Short, URL-safe conversation token.
pub fn conversation_token() -> Result<String, RoomError> {
    let alphabet_len = TOKEN_ALPHABET.len();
    let token = random_bytes(CONVERSATION_TOKEN_LENGTH)?
        .into_iter()
        .filter_map(|b| TOKEN_ALPHABET.get(usize::from(b) % alphabet_len))
        .map(|&c| char::from(c))
        .collect();
    Ok(token)
}

/// Access token for remote or anonymized attendees (64 hex chars).
pub fn access_token() -> Result<String, RoomError> {
    random_hex(TOKEN_BYTES)
}

/// Transport session token used when the caller does not bring its own.
pub fn session_token() -> Result<String, RoomError> {
    random_hex(TOKEN_BYTES)
}

/// Signing nonce sent as `<Prefix>-Random` (64 hex chars).
pub fn signing_nonce() -> Result<String, RoomError> {
    random_hex(TOKEN_BYTES)
}

/// `hex(hmac_sha256(secret, random || body))`.
#[must_use]
pub fn sign_request(secret: &[u8], random: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let mut context = hmac::Context::with_key(&key);
    context.update(random.as_bytes());
    context.update(body);
    hex::encode(context.sign().as_ref())
}

/// Constant-time check of a request signature produced by
/// [`sign_request`].
#[must_use]
pub fn verify_request(secret: &[u8], random: &str, body: &[u8], checksum: &str) -> bool {
    let Ok(tag) = hex::decode(checksum) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let mut message = Vec::with_capacity(random.len() + body.len());
    message.extend_from_slice(random.as_bytes());
    message.extend_from_slice(body);
    hmac::verify(&key, &message, &tag).is_ok()
}

/// Hash a join password with bcrypt.
///
/// # Errors
///
/// Returns `RoomError::Config` when `cost` is outside
/// `MIN_BCRYPT_COST..=MAX_BCRYPT_COST`, `RoomError::Internal` when hashing
/// fails.
#[instrument(skip_all)]
pub fn hash_password(password: &str, cost: u32) -> Result<String, RoomError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(RoomError::Config(format!(
            "Invalid bcrypt cost: {cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
        )));
    }
    bcrypt::hash(password, cost)
        .map_err(|e| RoomError::Internal(format!("Password hashing failed: {e}")))
}

/// Verify a join password against its bcrypt hash.
#[instrument(skip_all)]
pub fn verify_password(password: &str, hash: &str) -> Result<bool, RoomError> {
    bcrypt::verify(password, hash)
        .map_err(|e| RoomError::Internal(format!("Password verification failed: {e}")))
}

/// [`hash_password`] on the blocking thread pool, off the async workers.
pub async fn spawn_hash_password(password: SecretString, cost: u32) -> Result<String, RoomError> {
    tokio::task::spawn_blocking(move || hash_password(password.expose_secret(), cost))
        .await
        .map_err(|e| RoomError::Internal(format!("Password hashing task failed: {e}")))?
}

/// [`verify_password`] on the blocking thread pool.
pub async fn spawn_verify_password(password: SecretString, hash: String) -> Result<bool, RoomError> {
    tokio::task::spawn_blocking(move || verify_password(password.expose_secret(), &hash))
        .await
        .map_err(|e| RoomError::Internal(format!("Password verification task failed: {e}")))?
}
