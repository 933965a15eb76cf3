//! # Session Crypto
//!
//! X3DH key agreement and chain-key message protection.
//!
//! ## Key Agreement
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        X3DH KEY AGREEMENT                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Initiator (A)                         Responder (B)                    │
//! │  ─────────────                         ─────────────                    │
//! │  identity key IK_A                     identity key IK_B                │
//! │  ephemeral key EK_A (fresh)            signed prekey SPK_B              │
//! │                                        one-time prekey OPK_B (optional) │
//! │                                                                         │
//! │  DH1 = DH(IK_A, SPK_B)                                                  │
//! │  DH2 = DH(EK_A, IK_B)                                                   │
//! │  DH3 = DH(EK_A, SPK_B)                                                  │
//! │  DH4 = DH(EK_A, OPK_B)        only when the bundle carries an OPK       │
//! │                                                                         │
//! │  shared = HKDF(DH1 ‖ DH2 ‖ DH3 [‖ DH4], salt=∅, info="XelvraX3DH")     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concatenation order is fixed; both sides must produce identical input or
//! the derived secrets diverge.
//!
//! ## Message Protection
//!
//! Each message key is derived from the session chain key via HKDF with the
//! `XelvraMessageKey` info string, then used once with AES-256-GCM. Replays
//! are caught by a per-session sliding nonce window: a nonce seen inside the
//! window is rejected before any decryption work, and a nonce is only
//! recorded after a *successful* decrypt so that garbage ciphertext cannot
//! poison the table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{encryption, kdf, keys, KeyPair};
use crate::error::{Error, Result};
use crate::identity::Identity;

/// Default replay window
pub const DEFAULT_NONCE_WINDOW: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// X3DH BUNDLE
// ============================================================================

/// Prekey bundle published by a peer and consumed by session initiators.
pub struct X3dhBundle {
    /// Curve25519 identity public key
    pub identity_key: [u8; keys::KEY_SIZE],
    /// Curve25519 signed prekey public key
    pub signed_prekey: [u8; keys::KEY_SIZE],
    /// One-time prekey publics; the first one (if any) is consumed
    pub one_time_prekeys: Vec<[u8; keys::KEY_SIZE]>,
    /// Ed25519 signature by the owner's identity over `signed_prekey`
    pub signature: Vec<u8>,
}

impl X3dhBundle {
    /// Build a bundle, signing the prekey with the owner's identity.
    pub fn new(
        identity_key: [u8; keys::KEY_SIZE],
        signed_prekey: [u8; keys::KEY_SIZE],
        one_time_prekeys: Vec<[u8; keys::KEY_SIZE]>,
        signer: &dyn Identity,
    ) -> Result<Self> {
        let signature = signer.sign(&signed_prekey)?;
        Ok(Self {
            identity_key,
            signed_prekey,
            one_time_prekeys,
            signature,
        })
    }

    /// Verify the prekey signature against the owner's Ed25519 verifying key.
    ///
    /// Initiators should call this before computing any DH.
    pub fn verify_signature(&self, verifying_key: &[u8; 32]) -> Result<()> {
        let vk = VerifyingKey::from_bytes(verifying_key).map_err(|_| Error::SignatureInvalid)?;
        let sig_bytes: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| Error::SignatureInvalid)?;
        vk.verify(&self.signed_prekey, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| Error::SignatureInvalid)
    }
}

// ============================================================================
// SESSION SECRET
// ============================================================================

/// A 32-byte session or chain secret, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret([u8; keys::KEY_SIZE]);

impl SessionSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; keys::KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; keys::KEY_SIZE] {
        &self.0
    }
}

// ============================================================================
// DOUBLE RATCHET (reserved)
// ============================================================================

/// Double Ratchet session state.
///
/// Carried in the data model as the declared evolution point for full
/// forward-secrecy ratcheting; the current core drives only `chain_key`
/// through the message-key derivation.
pub struct DoubleRatchetState {
    /// Root key feeding DH ratchet steps
    pub root_key: [u8; keys::KEY_SIZE],
    /// Current sending chain key
    pub chain_key: [u8; keys::KEY_SIZE],
    /// Our current ratchet keypair
    pub sending_key: KeyPair,
    /// The peer's last advertised ratchet keypair
    pub receiving_key: KeyPair,
    /// Messages sent on the current chain
    pub message_number: u32,
    /// Length of the previous sending chain
    pub previous_chain_length: u32,
}

impl Drop for DoubleRatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.chain_key.zeroize();
    }
}

// ============================================================================
// NONCE WINDOW
// ============================================================================

/// Sliding-window record of AEAD nonces seen on a session.
///
/// Entries older than the window are evicted lazily on each check. Honest
/// peers draw random 96-bit nonces, so any in-window hit is a replay for all
/// practical purposes.
pub struct NonceWindow {
    seen: HashMap<String, Instant>,
    window: Duration,
}

impl NonceWindow {
    /// Create a window with the given width.
    pub fn new(window: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            window,
        }
    }

    /// Drop entries older than the window.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) <= window);
    }

    /// Whether this nonce was seen inside the window.
    pub fn contains(&self, nonce_hex: &str) -> bool {
        self.seen.contains_key(nonce_hex)
    }

    /// Record a nonce as used.
    pub fn insert(&mut self, nonce_hex: String) {
        self.seen.insert(nonce_hex, Instant::now());
    }

    /// Number of tracked nonces.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

// ============================================================================
// SESSION CRYPTO
// ============================================================================

/// Per-instance session crypto: a Curve25519 identity keypair, the X3DH
/// operations, chain-key message protection, and the replay window.
///
/// The window sits behind a mutex so one instance can serve concurrent
/// stream handlers; the decrypt path is the only writer.
pub struct SessionCrypto {
    identity: KeyPair,
    nonces: Mutex<NonceWindow>,
}

impl SessionCrypto {
    /// Create an instance with a fresh identity key and the default
    /// 5-minute replay window.
    pub fn new() -> Result<Self> {
        Self::with_nonce_window(DEFAULT_NONCE_WINDOW)
    }

    /// Create an instance with a custom replay window width.
    pub fn with_nonce_window(window: Duration) -> Result<Self> {
        Ok(Self {
            identity: KeyPair::generate()?,
            nonces: Mutex::new(NonceWindow::new(window)),
        })
    }

    /// The Curve25519 identity public key.
    pub fn identity_public(&self) -> [u8; keys::KEY_SIZE] {
        *self.identity.public_bytes()
    }

    /// Run X3DH as the initiator against a remote bundle.
    ///
    /// `ephemeral` must be fresh for this handshake. DH4 is included exactly
    /// when the bundle carries a one-time prekey, so both sides agree on the
    /// input length by construction.
    pub fn initiate_x3dh(
        &self,
        remote: &X3dhBundle,
        ephemeral: &KeyPair,
    ) -> Result<SessionSecret> {
        let dh1 = keys::diffie_hellman(self.identity.private_bytes(), &remote.signed_prekey)
            .map_err(|_| Error::HandshakeFailed { step: 1 })?;
        let dh2 = keys::diffie_hellman(ephemeral.private_bytes(), &remote.identity_key)
            .map_err(|_| Error::HandshakeFailed { step: 2 })?;
        let dh3 = keys::diffie_hellman(ephemeral.private_bytes(), &remote.signed_prekey)
            .map_err(|_| Error::HandshakeFailed { step: 3 })?;

        let mut ikm = Zeroizing::new(Vec::with_capacity(4 * keys::KEY_SIZE));
        ikm.extend_from_slice(&dh1);
        ikm.extend_from_slice(&dh2);
        ikm.extend_from_slice(&dh3);

        if let Some(opk) = remote.one_time_prekeys.first() {
            let dh4 = keys::diffie_hellman(ephemeral.private_bytes(), opk)
                .map_err(|_| Error::HandshakeFailed { step: 4 })?;
            ikm.extend_from_slice(&dh4);
        }

        derive_session_secret(&ikm)
    }

    /// Run X3DH as the responder, mirroring the initiator's DH set.
    ///
    /// `signed_prekey` is the local prekey the initiator used;
    /// `one_time_prekey` must be `Some` exactly when the published bundle
    /// carried one.
    pub fn respond_x3dh(
        &self,
        remote_identity: &[u8],
        remote_ephemeral: &[u8],
        signed_prekey: &KeyPair,
        one_time_prekey: Option<&KeyPair>,
    ) -> Result<SessionSecret> {
        let dh1 = keys::diffie_hellman(signed_prekey.private_bytes(), remote_identity)
            .map_err(|_| Error::HandshakeFailed { step: 1 })?;
        let dh2 = keys::diffie_hellman(self.identity.private_bytes(), remote_ephemeral)
            .map_err(|_| Error::HandshakeFailed { step: 2 })?;
        let dh3 = keys::diffie_hellman(signed_prekey.private_bytes(), remote_ephemeral)
            .map_err(|_| Error::HandshakeFailed { step: 3 })?;

        let mut ikm = Zeroizing::new(Vec::with_capacity(4 * keys::KEY_SIZE));
        ikm.extend_from_slice(&dh1);
        ikm.extend_from_slice(&dh2);
        ikm.extend_from_slice(&dh3);

        if let Some(opk) = one_time_prekey {
            let dh4 = keys::diffie_hellman(opk.private_bytes(), remote_ephemeral)
                .map_err(|_| Error::HandshakeFailed { step: 4 })?;
            ikm.extend_from_slice(&dh4);
        }

        derive_session_secret(&ikm)
    }

    /// Encrypt a message under a chain key.
    ///
    /// The per-message key is derived fresh, used once, and zeroized when
    /// this call returns.
    pub fn encrypt_message(&self, plaintext: &[u8], chain_key: &[u8]) -> Result<Vec<u8>> {
        let message_key = derive_message_key(chain_key)?;
        encryption::seal(&message_key, plaintext)
    }

    /// Decrypt a message under a chain key, enforcing the replay window.
    ///
    /// The nonce is recorded only after a successful decrypt.
    pub fn decrypt_message(&self, wire: &[u8], chain_key: &[u8]) -> Result<Vec<u8>> {
        if wire.len() < encryption::NONCE_SIZE + encryption::TAG_SIZE {
            return Err(Error::DecryptFailed);
        }
        let nonce_hex = hex::encode(&wire[..encryption::NONCE_SIZE]);

        {
            let mut window = self.nonces.lock();
            window.evict_expired();
            if window.contains(&nonce_hex) {
                return Err(Error::NonceReplay);
            }
        }

        let message_key = derive_message_key(chain_key)?;
        let plaintext = encryption::open(&message_key, wire)?;

        self.nonces.lock().insert(nonce_hex);
        Ok(plaintext)
    }

    /// Zero the identity private key and clear the nonce table.
    ///
    /// Also runs on drop, so every exit path destroys.
    pub fn destroy(&mut self) {
        self.identity.destroy();
        self.nonces.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn identity_private_is_zeroed(&self) -> bool {
        *self.identity.private_bytes() == [0u8; keys::KEY_SIZE]
    }
}

impl Drop for SessionCrypto {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn derive_session_secret(ikm: &[u8]) -> Result<SessionSecret> {
    let mut secret = [0u8; keys::KEY_SIZE];
    kdf::derive(ikm, None, kdf::domain::X3DH, &mut secret)?;
    Ok(SessionSecret::from_bytes(secret))
}

fn derive_message_key(chain_key: &[u8]) -> Result<Zeroizing<[u8; encryption::KEY_SIZE]>> {
    let mut message_key = Zeroizing::new([0u8; encryption::KEY_SIZE]);
    kdf::derive(chain_key, None, kdf::domain::MESSAGE_KEY, &mut *message_key)?;
    Ok(message_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;

    fn bundle_for(
        session: &SessionCrypto,
        signed_prekey: &KeyPair,
        one_time: Option<&KeyPair>,
        signer: &LocalIdentity,
    ) -> X3dhBundle {
        X3dhBundle::new(
            session.identity_public(),
            *signed_prekey.public_bytes(),
            one_time.map(|k| vec![*k.public_bytes()]).unwrap_or_default(),
            signer,
        )
        .unwrap()
    }

    #[test]
    fn x3dh_both_sides_derive_same_secret() {
        let alice = SessionCrypto::new().unwrap();
        let bob = SessionCrypto::new().unwrap();
        let bob_signer = LocalIdentity::generate();

        let bob_spk = KeyPair::generate().unwrap();
        let bundle = bundle_for(&bob, &bob_spk, None, &bob_signer);
        bundle
            .verify_signature(&bob_signer.verifying_key_bytes())
            .unwrap();

        let ephemeral = KeyPair::generate().unwrap();
        let alice_secret = alice.initiate_x3dh(&bundle, &ephemeral).unwrap();

        let bob_secret = bob
            .respond_x3dh(
                &alice.identity_public(),
                ephemeral.public_bytes(),
                &bob_spk,
                None,
            )
            .unwrap();

        assert_eq!(alice_secret.as_bytes(), bob_secret.as_bytes());
    }

    #[test]
    fn x3dh_with_one_time_prekey_stays_symmetric() {
        let alice = SessionCrypto::new().unwrap();
        let bob = SessionCrypto::new().unwrap();
        let bob_signer = LocalIdentity::generate();

        let bob_spk = KeyPair::generate().unwrap();
        let bob_opk = KeyPair::generate().unwrap();
        let bundle = bundle_for(&bob, &bob_spk, Some(&bob_opk), &bob_signer);

        let ephemeral = KeyPair::generate().unwrap();
        let alice_secret = alice.initiate_x3dh(&bundle, &ephemeral).unwrap();

        let bob_secret = bob
            .respond_x3dh(
                &alice.identity_public(),
                ephemeral.public_bytes(),
                &bob_spk,
                Some(&bob_opk),
            )
            .unwrap();

        assert_eq!(alice_secret.as_bytes(), bob_secret.as_bytes());
    }

    #[test]
    fn x3dh_opk_changes_the_secret() {
        let alice = SessionCrypto::new().unwrap();
        let bob = SessionCrypto::new().unwrap();
        let bob_signer = LocalIdentity::generate();

        let bob_spk = KeyPair::generate().unwrap();
        let bob_opk = KeyPair::generate().unwrap();
        let with_opk = bundle_for(&bob, &bob_spk, Some(&bob_opk), &bob_signer);
        let without_opk = bundle_for(&bob, &bob_spk, None, &bob_signer);

        let ephemeral = KeyPair::generate().unwrap();
        let a = alice.initiate_x3dh(&with_opk, &ephemeral).unwrap();
        let b = alice.initiate_x3dh(&without_opk, &ephemeral).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn bundle_rejects_signature_from_wrong_identity() {
        let bob = SessionCrypto::new().unwrap();
        let bob_signer = LocalIdentity::generate();
        let mallory = LocalIdentity::generate();

        let bob_spk = KeyPair::generate().unwrap();
        let bundle = bundle_for(&bob, &bob_spk, None, &mallory);

        assert!(matches!(
            bundle.verify_signature(&bob_signer.verifying_key_bytes()),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn message_roundtrip_under_chain_key() {
        let session = SessionCrypto::new().unwrap();
        let chain_key = [0x42u8; 32];

        let wire = session.encrypt_message(b"hello", &chain_key).unwrap();
        let plaintext = session.decrypt_message(&wire, &chain_key).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn replayed_ciphertext_is_rejected() {
        let session = SessionCrypto::new().unwrap();
        let chain_key = [0x42u8; 32];

        let wire = session.encrypt_message(b"hello", &chain_key).unwrap();
        assert_eq!(session.decrypt_message(&wire, &chain_key).unwrap(), b"hello");

        assert!(matches!(
            session.decrypt_message(&wire, &chain_key),
            Err(Error::NonceReplay)
        ));
    }

    #[test]
    fn failed_decrypt_does_not_poison_the_window() {
        let session = SessionCrypto::new().unwrap();
        let chain_key = [0x42u8; 32];

        let wire = session.encrypt_message(b"hello", &chain_key).unwrap();

        // Same nonce, corrupted tag: must fail without recording the nonce.
        let mut bogus = wire.clone();
        let last = bogus.len() - 1;
        bogus[last] ^= 0xFF;
        assert!(matches!(
            session.decrypt_message(&bogus, &chain_key),
            Err(Error::DecryptFailed)
        ));

        // The genuine ciphertext still decrypts.
        assert_eq!(session.decrypt_message(&wire, &chain_key).unwrap(), b"hello");
    }

    #[test]
    fn nonce_window_evicts_old_entries() {
        let session = SessionCrypto::with_nonce_window(Duration::from_millis(10)).unwrap();
        let chain_key = [0x42u8; 32];

        let wire = session.encrypt_message(b"hello", &chain_key).unwrap();
        session.decrypt_message(&wire, &chain_key).unwrap();

        std::thread::sleep(Duration::from_millis(25));

        // Window has passed; the nonce is forgotten and the replay succeeds.
        // This is the documented boundary of the defense, not a hole: the
        // window trades unbounded memory for a bounded acceptance horizon.
        assert_eq!(session.decrypt_message(&wire, &chain_key).unwrap(), b"hello");
        assert_eq!(session.nonces.lock().len(), 1);
    }

    #[test]
    fn destroy_zeroes_identity_and_clears_nonces() {
        let mut session = SessionCrypto::new().unwrap();
        let chain_key = [0x42u8; 32];
        let wire = session.encrypt_message(b"hello", &chain_key).unwrap();
        session.decrypt_message(&wire, &chain_key).unwrap();

        session.destroy();
        assert!(session.identity_private_is_zeroed());
        assert!(session.nonces.lock().is_empty());
    }
}
