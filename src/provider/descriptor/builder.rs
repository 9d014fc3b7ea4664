// self
use crate::{
	_prelude::*,
	provider::{OAUTH_BETA, ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Usage endpoint is required for health probes.
	#[error("Missing usage endpoint.")]
	MissingUsageEndpoint,
	/// Profile endpoint is required for account resolution.
	#[error("Missing profile endpoint.")]
	MissingProfileEndpoint,
	/// Token endpoint is required for refreshes.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Client identifier cannot be blank.
	#[error("Client identifier cannot be empty.")]
	EmptyClientId,
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// A built-in endpoint literal failed to parse.
	#[error("Endpoint URL is invalid: {url}.")]
	InvalidUrl {
		/// Offending URL literal.
		url: String,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Public client identifier.
	pub client_id: String,
	/// Usage endpoint.
	pub usage_endpoint: Option<Url>,
	/// Profile endpoint.
	pub profile_endpoint: Option<Url>,
	/// Token endpoint used for refreshes.
	pub token_endpoint: Option<Url>,
	/// Beta header value; defaults to [`OAUTH_BETA`].
	pub beta_header: Option<String>,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided client identifier.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			usage_endpoint: None,
			profile_endpoint: None,
			token_endpoint: None,
			beta_header: Some(OAUTH_BETA.into()),
		}
	}

	/// Sets the usage endpoint.
	pub fn usage_endpoint(mut self, url: Url) -> Self {
		self.usage_endpoint = Some(url);

		self
	}

	/// Sets the profile endpoint.
	pub fn profile_endpoint(mut self, url: Url) -> Self {
		self.profile_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Overrides (or clears) the beta header sent to the usage and profile endpoints.
	pub fn beta_header(mut self, value: Option<String>) -> Self {
		self.beta_header = value;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let usage = self.usage_endpoint.ok_or(ProviderDescriptorError::MissingUsageEndpoint)?;
		let profile =
			self.profile_endpoint.ok_or(ProviderDescriptorError::MissingProfileEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let descriptor = ProviderDescriptor {
			client_id: self.client_id,
			endpoints: ProviderEndpoints { usage, profile, token },
			beta_header: self.beta_header,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if self.client_id.trim().is_empty() {
			return Err(ProviderDescriptorError::EmptyClientId);
		}

		validate_endpoint("usage", &self.endpoints.usage)?;
		validate_endpoint("profile", &self.endpoints.profile)?;
		validate_endpoint("token", &self.endpoints.token)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() == "https" || is_loopback(url) {
		Ok(())
	} else {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(addr)) => addr.is_loopback(),
		Some(url::Host::Ipv6(addr)) => addr.is_loopback(),
		None => false,
	}
}
