//! Registration and login flows over the store and the face pipeline.

use facegate_core::{decode_grayscale, Descriptor, DescriptorExtractor, ExtractError, ImageError};
use facegate_store::{StoreError, UserStore};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("email or password incorrect")]
    PasswordMismatch,
    #[error("face verification failed")]
    FaceMismatch,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identity established by a successful login, handed back to the caller
/// instead of being kept as ambient state.
#[derive(Debug, Clone)]
pub struct Session {
    pub email: String,
    pub username: String,
}

/// Register an account, enrolling a facial descriptor when a photo is given.
///
/// The enrollment photo travels together with the extractor that encodes
/// it, so a photo can never arrive without the models loaded. The photo
/// must decode and contain at least one detectable face; otherwise
/// registration fails before touching the store.
pub fn register_account<E: DescriptorExtractor>(
    store: &UserStore,
    username: &str,
    email: &str,
    password: &str,
    enrollment: Option<(&mut E, &[u8])>,
) -> Result<(), AuthError> {
    let descriptor = match enrollment {
        Some((extractor, bytes)) => {
            let image = decode_grayscale(bytes)?;
            let descriptor = extractor.extract_descriptor(&image.data, image.width, image.height)?;
            Some(descriptor.to_bytes())
        }
        None => None,
    };

    store.register(username, email, password, descriptor.as_deref())?;
    Ok(())
}

/// Compare a live frame against the claimed account's stored descriptor.
///
/// Fails closed: unknown email, missing descriptor, corrupt descriptor
/// blob and extraction failure all yield `false`.
pub fn authenticate_by_face<E: DescriptorExtractor>(
    extractor: &mut E,
    gray: &[u8],
    width: u32,
    height: u32,
    email: &str,
    store: &UserStore,
    threshold: f32,
) -> Result<bool, StoreError> {
    let stored = match store.descriptor(email) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            tracing::warn!(email, "no facial descriptor enrolled");
            return Ok(false);
        }
        Err(StoreError::NotFound) => return Ok(false),
        Err(e) => return Err(e),
    };

    let known = match Descriptor::from_bytes(&stored) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(email, error = %e, "stored descriptor is unreadable");
            return Ok(false);
        }
    };

    let probe = match extractor.extract_descriptor(gray, width, height) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(email, error = %e, "live frame yielded no descriptor");
            return Ok(false);
        }
    };

    let distance = probe.euclidean_distance(&known);
    tracing::debug!(email, distance, threshold, "face comparison");
    Ok(probe.matches(&known, threshold))
}

/// Full login: password check, then face check against the live frame.
pub fn login<E: DescriptorExtractor>(
    store: &UserStore,
    extractor: &mut E,
    gray: &[u8],
    width: u32,
    height: u32,
    email: &str,
    password: &str,
    threshold: f32,
) -> Result<Session, AuthError> {
    if !store.verify_password(email, password)? {
        return Err(AuthError::PasswordMismatch);
    }

    if !authenticate_by_face(extractor, gray, width, height, email, store, threshold)? {
        return Err(AuthError::FaceMismatch);
    }

    let profile = store.profile(email)?;
    Ok(Session {
        email: email.to_string(),
        username: profile.username,
    })
}
