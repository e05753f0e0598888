//! SOAP `login()` with username, password and security token.

use std::fmt;

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use relay_sf_client::{AccessToken, Auth, AuthContext, Request};
use tracing::{debug, instrument};

use crate::error::{Error, ErrorKind, Result};

/// Username/password login against the partner SOAP API.
///
/// The session id returned by `login()` is used as a bearer token.
#[derive(Clone)]
pub struct SoapLogin {
    username: String,
    password: String,
    security_token: String,
}

impl fmt::Debug for SoapLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapLogin")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("security_token", &"[REDACTED]")
            .finish()
    }
}

impl SoapLogin {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        security_token: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            security_token: security_token.into(),
        }
    }

    fn envelope(&self) -> String {
        let password = format!("{}{}", self.password, self.security_token);
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">
  <env:Body>
    <n1:login xmlns:n1="urn:partner.soap.sforce.com">
      <n1:username>{username}</n1:username>
      <n1:password>{password}</n1:password>
    </n1:login>
  </env:Body>
</env:Envelope>"#,
            username = escape(self.username.as_str()),
            password = escape(password.as_str()),
        )
    }
}

#[async_trait]
impl Auth for SoapLogin {
    #[instrument(skip(self, ctx), fields(base_url = %ctx.base_url, username = %self.username))]
    async fn acquire(&self, ctx: &AuthContext<'_>) -> relay_sf_client::Result<AccessToken> {
        let url = format!("{}/services/Soap/u/{}", ctx.base_url, ctx.api_version);
        let request = Request::post(url)
            .header("SOAPAction", "login")
            .xml(self.envelope());

        let response = ctx.send(request).await?;
        let body = parse_login_response(&response.text())?;

        if !response.is_success() {
            let message = body
                .exception_message
                .or(body.fault_string)
                .unwrap_or_else(|| format!("HTTP {}", response.status()));
            return Err(Error::new(ErrorKind::SoapFault(message)).into());
        }

        let session_id = body.session_id.ok_or_else(|| {
            Error::new(ErrorKind::Xml(
                "sessionId missing from login response".to_string(),
            ))
        })?;
        debug!("SOAP login succeeded");

        Ok(match body.session_seconds_valid {
            Some(seconds) => AccessToken::expires_in(session_id, seconds),
            None => AccessToken::new(session_id),
        })
    }

    fn is_expired(&self, token: &AccessToken) -> bool {
        token.is_expired()
    }
}

/// Fields of interest from a login response or fault.
#[derive(Debug, Default)]
struct LoginResponse {
    session_id: Option<String>,
    session_seconds_valid: Option<i64>,
    exception_message: Option<String>,
    fault_string: Option<String>,
}

#[derive(Clone, Copy)]
enum Field {
    SessionId,
    SessionSecondsValid,
    ExceptionMessage,
    FaultString,
}

fn parse_login_response(xml: &str) -> Result<LoginResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = LoginResponse::default();
    let mut current = None;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(element) => {
                current = match element.local_name().as_ref() {
                    b"sessionId" => Some(Field::SessionId),
                    b"sessionSecondsValid" => Some(Field::SessionSecondsValid),
                    b"exceptionMessage" => Some(Field::ExceptionMessage),
                    b"faultstring" => Some(Field::FaultString),
                    _ => None,
                };
            }
            XmlEvent::Text(text) => {
                let Some(field) = current else { continue };
                let value = text
                    .unescape()
                    .map_err(|e| Error::new(ErrorKind::Xml(e.to_string())))?
                    .into_owned();
                match field {
                    Field::SessionId => parsed.session_id = Some(value),
                    Field::SessionSecondsValid => {
                        parsed.session_seconds_valid = value.parse().ok();
                    }
                    Field::ExceptionMessage => parsed.exception_message = Some(value),
                    Field::FaultString => parsed.fault_string = Some(value),
                }
            }
            XmlEvent::End(_) => current = None,
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(parsed)
}
