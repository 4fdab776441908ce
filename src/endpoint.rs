//! Server endpoint settings and URL building.

use url::Url;

use crate::error::{NetError, Result};
use crate::protocol::RoomInfo;

/// Where the game server lives, derived from its base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub hostname: String,
    /// `https`/`wss` base URL.
    pub secure: bool,
    pub port: u16,
    /// Base path without a trailing `/`; empty for the root.
    pub pathname: String,
    /// Query string carried by the base URL, without the `?`.
    pub search_params: Option<String>,
}

impl Endpoint {
    /// Parse a base URL such as `https://game.example.com:8443/api`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidUrl`] if the URL does not parse or has no
    /// host.
    pub fn parse(base: &str) -> Result<Self> {
        let url = Url::parse(base).map_err(|e| NetError::InvalidUrl(format!("{base}: {e}")))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| NetError::InvalidUrl(format!("{base}: missing host")))?
            .to_ascii_lowercase();
        let secure = matches!(url.scheme(), "https" | "wss");
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });
        let pathname = url.path().trim_end_matches('/').to_owned();
        let search_params = url.query().filter(|q| !q.is_empty()).map(str::to_owned);
        Ok(Self {
            hostname,
            secure,
            port,
            pathname,
            search_params,
        })
    }

    fn port_suffix(&self) -> String {
        match self.port {
            80 | 443 => String::new(),
            port => format!(":{port}"),
        }
    }

    /// Absolute HTTP URL for `path`, relative to the base path.
    pub fn http_url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let sep = if path.starts_with('/') { "" } else { "/" };
        let mut out = format!(
            "{scheme}://{}{}{}{sep}{path}",
            self.hostname,
            self.port_suffix(),
            self.pathname
        );
        if let Some(search) = &self.search_params {
            out.push('?');
            out.push_str(search);
        }
        out
    }

    /// Room connection URL for a reserved seat.
    ///
    /// `params` are appended to the base query string, percent-encoded.
    /// A room `public_address` replaces the configured host, port and path.
    pub fn room_url(&self, room: &RoomInfo, params: &[(String, String)], protocol: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(
            self.search_params.clone().unwrap_or_default(),
        );
        for (name, value) in params {
            query.append_pair(name, value);
        }
        let query = query.finish();

        let scheme = if self.secure {
            format!("{protocol}s")
        } else {
            protocol.to_owned()
        };
        let authority = match &room.public_address {
            Some(address) => address.clone(),
            None => format!("{}{}{}", self.hostname, self.port_suffix(), self.pathname),
        };
        format!(
            "{scheme}://{authority}/{}/{}?{query}",
            room.process_id, room.room_id
        )
    }
}

/// Flatten a JSON object of join options into query parameters.
///
/// String values are used as-is; other values use their JSON text. Nulls
/// and non-object inputs produce nothing.
pub fn flatten_options(options: &serde_json::Value) -> Vec<(String, String)> {
    let Some(obj) = options.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn room(public_address: Option<&str>) -> RoomInfo {
        RoomInfo {
            name: "lobby".into(),
            room_id: "r1".into(),
            process_id: "p1".into(),
            public_address: public_address.map(str::to_owned),
        }
    }

    #[test]
    fn parses_secure_default_port() {
        let ep = Endpoint::parse("https://Game.Example.com/").unwrap();
        assert_eq!(ep.hostname, "game.example.com");
        assert!(ep.secure);
        assert_eq!(ep.port, 443);
        assert_eq!(ep.pathname, "");
        assert_eq!(ep.search_params, None);
    }

    #[test]
    fn keeps_custom_port_path_and_query() {
        let ep = Endpoint::parse("http://localhost:3520/api/?region=eu").unwrap();
        assert!(!ep.secure);
        assert_eq!(ep.port, 3520);
        assert_eq!(ep.pathname, "/api");
        assert_eq!(
            ep.http_url("matchmake/joinOrCreate/lobby"),
            "http://localhost:3520/api/matchmake/joinOrCreate/lobby?region=eu"
        );
        assert_eq!(
            ep.http_url("/api/auth/login"),
            "http://localhost:3520/api/api/auth/login?region=eu"
        );
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(
            Endpoint::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn room_url_encodes_params() {
        let ep = Endpoint::parse("https://game.example.com").unwrap();
        let params = vec![
            ("sessionId".to_string(), "s1".to_string()),
            ("_authToken".to_string(), "a b&c".to_string()),
        ];
        assert_eq!(
            ep.room_url(&room(None), &params, "ws"),
            "wss://game.example.com/p1/r1?sessionId=s1&_authToken=a+b%26c"
        );
    }

    #[test]
    fn public_address_overrides_host() {
        let ep = Endpoint::parse("http://localhost:2567/base?x=1").unwrap();
        assert_eq!(
            ep.room_url(&room(Some("10.0.0.5:4000")), &[("sessionId".into(), "s".into())], "ws"),
            "ws://10.0.0.5:4000/p1/r1?x=1&sessionId=s"
        );
    }

    #[test]
    fn flattens_join_options() {
        let opts = serde_json::json!({ "mode": "daily", "level": 3, "skip": null });
        let flat = flatten_options(&opts);
        assert!(flat.contains(&("mode".into(), "daily".into())));
        assert!(flat.contains(&("level".into(), "3".into())));
        assert_eq!(flat.len(), 2);
        assert!(flatten_options(&serde_json::Value::Null).is_empty());
    }
}
