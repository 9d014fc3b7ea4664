//! Account resolution through the provider's profile endpoint.

// self
use crate::{
	_prelude::*,
	auth::{AccountId, TokenSecret},
	flows::Rotator,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	provider::EndpointKind,
};

/// Account that owns a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountProfile {
	/// Stable account identifier.
	pub account_uuid: AccountId,
	/// Account email, when disclosed.
	pub email: Option<String>,
}

#[derive(Deserialize)]
struct ProfileResponse {
	account: ProfileAccount,
}

#[derive(Deserialize)]
struct ProfileAccount {
	uuid: String,
	#[serde(default, alias = "email_address")]
	email: Option<String>,
}

impl<C, M> Rotator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Looks up the account behind `access_token`; any failure yields `None`.
	pub async fn fetch_profile(&self, access_token: &TokenSecret) -> Option<AccountProfile> {
		let response = match self.authorized_get(EndpointKind::Profile, access_token).await {
			Ok(response) if (200..300).contains(&response.status) => response,
			Ok(response) => {
				tracing::debug!(status = response.status, "Profile lookup was rejected.");

				return None;
			},
			Err(e) => {
				tracing::debug!(error = %e, "Profile lookup failed.");

				return None;
			},
		};

		parse_profile(&response.body)
	}
}

fn parse_profile(body: &[u8]) -> Option<AccountProfile> {
	let mut de = serde_json::Deserializer::from_slice(body);
	let parsed: ProfileResponse = match serde_path_to_error::deserialize(&mut de) {
		Ok(parsed) => parsed,
		Err(e) => {
			tracing::debug!(path = %e.path(), "Profile response is malformed.");

			return None;
		},
	};
	let account_uuid = AccountId::new(parsed.account.uuid.trim()).ok()?;

	Some(AccountProfile {
		account_uuid,
		email: parsed.account.email.filter(|email| !email.trim().is_empty()),
	})
}
