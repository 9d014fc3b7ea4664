//! Provider descriptor data structures shared by all flows.
//!
//! The module exposes validated endpoint metadata and the builder used to assemble it so flows
//! can reach the provider in a transport-agnostic way.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::_prelude::*;

/// Default public OAuth client identifier used for refresh exchanges.
pub const DEFAULT_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
/// Beta header value the usage and profile endpoints require for OAuth tokens.
pub const OAUTH_BETA: &str = "oauth-2025-04-20";

/// Remote endpoints the rotator talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
	/// Usage/quota endpoint probed for health.
	Usage,
	/// Account profile endpoint used to resolve key ownership.
	Profile,
	/// Token endpoint used for refresh exchanges.
	Token,
}
impl EndpointKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			EndpointKind::Usage => "usage",
			EndpointKind::Profile => "profile",
			EndpointKind::Token => "token",
		}
	}
}
impl Display for EndpointKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Usage endpoint returning per-window utilization.
	pub usage: Url,
	/// Profile endpoint returning the owning account.
	pub profile: Url,
	/// Token endpoint used for refreshes.
	pub token: Url,
}
impl ProviderEndpoints {
	/// Returns the URL for the requested endpoint.
	pub fn get(&self, kind: EndpointKind) -> &Url {
		match kind {
			EndpointKind::Usage => &self.usage,
			EndpointKind::Profile => &self.profile,
			EndpointKind::Token => &self.token,
		}
	}
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Public OAuth client identifier sent with refresh exchanges.
	pub client_id: String,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Value for the `anthropic-beta` header on usage/profile calls, if required.
	pub beta_header: Option<String>,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided client identifier.
	pub fn builder(client_id: impl Into<String>) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(client_id)
	}

	/// Descriptor for the production Anthropic OAuth endpoints.
	pub fn anthropic() -> Result<Self, ProviderDescriptorError> {
		let parse = |raw: &str| {
			Url::parse(raw).map_err(|_| ProviderDescriptorError::InvalidUrl { url: raw.into() })
		};

		Self::builder(DEFAULT_CLIENT_ID)
			.usage_endpoint(parse("https://api.anthropic.com/api/oauth/usage")?)
			.profile_endpoint(parse("https://api.anthropic.com/api/oauth/profile")?)
			.token_endpoint(parse("https://console.anthropic.com/v1/oauth/token")?)
			.build()
	}
}
