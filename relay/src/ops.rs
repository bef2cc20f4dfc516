//! The relay's operation table: request/response body shapes for every
//! named operation, plus the asynchronous notifications the relay may push.

use std::net::SocketAddrV4;

use crate::dict::{Dict, Value};

/// Operation names, used both to build requests and to key the
/// notification-handler registry.
pub mod op {
	pub const WELCOME: &str = "welcome";
	pub const LOGIN: &str = "login";
	pub const AUTO_LOGIN: &str = "auto-login";
	pub const REGISTER: &str = "register";
	pub const FIND_CONTACTS: &str = "find-contacts";
	pub const ADD_CONTACT: &str = "add-contact";
	pub const ACCEPT_CONTACT: &str = "accept-contact";
	pub const IS_ONLINE: &str = "is-online";
	pub const CONNECT: &str = "connect";
	pub const ACCEPT_CONNECT: &str = "accept-connect";

	pub const NEW_INVITATION: &str = "new-invitation";
	pub const NEW_FRIEND: &str = "new-friend";
	pub const ONLINE_STATUS: &str = "online-status";
	pub const NEW_ACCEPT_CONNECT: &str = "new-accept-connect";
}

pub fn welcome_request(version: &str) -> Dict {
	Dict::new().insert("ver", version)
}

pub fn login_request(usr: &str, pw: &str) -> Dict {
	Dict::new().insert("usr", usr).insert("pw", pw)
}

pub fn auto_login_request(tok: &str) -> Dict {
	Dict::new().insert("tok", tok)
}

pub fn register_request(usr: &str, pw: &str) -> Dict {
	Dict::new().insert("usr", usr).insert("pw", pw)
}

/// Credentials returned by `login`, `auto-login`, and `register`.
pub struct Credentials {
	pub usr: String,
	pub id: String,
	pub tok: String,
}

impl Credentials {
	pub fn from_body(body: &Dict) -> Option<Self> {
		Some(Self {
			usr: body.get("usr")?.as_str()?.to_owned(),
			id: body.get("id")?.as_str()?.to_owned(),
			tok: body.get("tok")?.as_str()?.to_owned(),
		})
	}
}

pub fn find_contacts_request(tok: &str, query: &str) -> Dict {
	Dict::new().insert("tok", tok).insert("q", query)
}

pub struct Contact {
	pub id: String,
}

pub fn find_contacts_response(body: &Dict) -> Option<Vec<Contact>> {
	body.get("r")?
		.as_list()?
		.iter()
		.map(|v| v.as_dict().and_then(|d| d.get("id")).and_then(Value::as_str).map(|id| Contact { id: id.to_owned() }))
		.collect()
}

pub fn add_contact_request(tok: &str, id: &str) -> Dict {
	Dict::new().insert("tok", tok).insert("id", id)
}

pub fn accept_contact_request(tok: &str, id: &str) -> Dict {
	Dict::new().insert("tok", tok).insert("id", id)
}

pub fn is_online_request(tok: &str, id: &str) -> Dict {
	Dict::new().insert("tok", tok).insert("id", id)
}

pub fn is_online_response(body: &Dict) -> Option<bool> {
	Some(body.get("val")?.as_int()? != 0)
}

/// 6-byte compact endpoint: 4-byte IPv4 (network order) | 2-byte port (network order).
fn encode_endpoint(ep: SocketAddrV4) -> Vec<u8> {
	protocol::endpoint::encode(ep).to_vec()
}

pub fn connect_request(tok: &str, id: &str, private: SocketAddrV4, public: SocketAddrV4) -> Dict {
	Dict::new().insert("tok", tok).insert("id", id).insert("prip", encode_endpoint(private)).insert("pubip", encode_endpoint(public))
}

pub fn accept_connect_request(tok: &str, id: &str, private: SocketAddrV4, public: SocketAddrV4) -> Dict {
	Dict::new().insert("tok", tok).insert("id", id).insert("prip", encode_endpoint(private)).insert("pubip", encode_endpoint(public))
}

/// The candidate endpoints carried by a `new-accept-connect` notification,
/// ready to be handed to a Rendezvous Race.
pub struct PeerEndpoints {
	pub private: SocketAddrV4,
	pub public: SocketAddrV4,
}

pub fn new_accept_connect_body(body: &Dict) -> Option<PeerEndpoints> {
	let private = protocol::endpoint::decode(body.get("prip")?.as_bytes()?)?;
	let public = protocol::endpoint::decode(body.get("pubip")?.as_bytes()?)?;

	Some(PeerEndpoints { private, public })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn credentials_round_trip_through_dict() {
		let body = Dict::new().insert("usr", "alice").insert("id", "abc123").insert("tok", "sekrit");
		let creds = Credentials::from_body(&body).unwrap();
		assert_eq!(creds.usr, "alice");
		assert_eq!(creds.id, "abc123");
		assert_eq!(creds.tok, "sekrit");
	}

	#[test]
	fn credentials_missing_field_is_none() {
		let body = Dict::new().insert("usr", "alice").insert("id", "abc123");
		assert!(Credentials::from_body(&body).is_none());
	}

	#[test]
	fn find_contacts_response_parses_id_list() {
		let body = Dict::new().insert(
			"r",
			Value::List(vec![Value::from(Dict::new().insert("id", "a")), Value::from(Dict::new().insert("id", "b"))]),
		);
		let contacts = find_contacts_response(&body).unwrap();
		assert_eq!(contacts.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
	}

	#[test]
	fn is_online_response_maps_nonzero_to_true() {
		let body = Dict::new().insert("val", 1i64);
		assert_eq!(is_online_response(&body), Some(true));

		let body = Dict::new().insert("val", 0i64);
		assert_eq!(is_online_response(&body), Some(false));
	}

	#[test]
	fn connect_request_carries_both_endpoints() {
		let private: SocketAddrV4 = "10.0.0.1:1234".parse().unwrap();
		let public: SocketAddrV4 = "203.0.113.9:4321".parse().unwrap();
		let req = connect_request("tok", "peer-id", private, public);

		assert_eq!(req.get("prip").and_then(Value::as_bytes), Some(&encode_endpoint(private)[..]));
		assert_eq!(req.get("pubip").and_then(Value::as_bytes), Some(&encode_endpoint(public)[..]));
	}

	#[test]
	fn new_accept_connect_body_round_trip() {
		let private: SocketAddrV4 = "10.0.0.1:1234".parse().unwrap();
		let public: SocketAddrV4 = "203.0.113.9:4321".parse().unwrap();
		let body = Dict::new().insert("prip", encode_endpoint(private)).insert("pubip", encode_endpoint(public));

		let endpoints = new_accept_connect_body(&body).unwrap();
		assert_eq!(endpoints.private, private);
		assert_eq!(endpoints.public, public);
	}
}
