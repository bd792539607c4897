//! Sealing: plaintext + passphrase → envelope, and back

use secrecy::SecretString;
use sealtree_core::SealResult;

use crate::cipher::{decrypt, encrypt, generate_iv, generate_salt};
use crate::envelope::Envelope;
use crate::kdf::derive_key;

/// Encrypt `plaintext` into a new envelope.
///
/// Salt and IV are drawn fresh on every call, so sealing the same plaintext
/// twice never produces the same envelope.
pub fn seal(plaintext: &[u8], passphrase: &SecretString, iterations: u32) -> SealResult<Envelope> {
    let salt = generate_salt();
    let iv = generate_iv();
    let key = derive_key(passphrase, &salt, iterations)?;
    let ciphertext = encrypt(plaintext, &key, &iv)?;
    Ok(Envelope::new(iterations, salt, iv, ciphertext))
}

/// Recover the plaintext of an envelope using its own salt and iteration count.
pub fn open(envelope: &Envelope, passphrase: &SecretString) -> SealResult<Vec<u8>> {
    let key = derive_key(passphrase, &envelope.salt, envelope.iterations)?;
    decrypt(&envelope.ciphertext, &key, &envelope.iv)
}
