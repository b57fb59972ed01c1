use base64::{
	alphabet,
	engine::{self, general_purpose},
	Engine,
};
use rand::{rngs::OsRng, RngCore};

pub const CUSTOM_ENGINE: engine::GeneralPurpose = engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);

pub const TOKEN_BYTES: usize = 32;

/// Opaque URL-safe token drawn from the operating system's CSPRNG.
pub fn random_token() -> String {
	let mut bytes = [0u8; TOKEN_BYTES];
	OsRng.fill_bytes(&mut bytes);
	CUSTOM_ENGINE.encode(bytes)
}
