//! UPnP port mapping.
//!
//! Discovers an internet gateway over SSDP and asks it to forward the listen
//! port, so peers behind the NAT can reach us. One mapping per run; nothing
//! is torn down on exit.

use std::net::SocketAddrV4;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::constants::{SSDP_MULTICAST, SSDP_PORT, UPNP_DISCOVERY_TIMEOUT, UPNP_REQUEST_TIMEOUT};

const WAN_IP_SERVICE: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

/// Errors during gateway discovery or the mapping call.
#[derive(Debug, Error)]
pub enum UpnpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("discovery timed out")]
    Timeout,

    #[error("invalid gateway response: {0}")]
    InvalidResponse(&'static str),

    #[error("gateway refused the mapping: {0}")]
    Refused(reqwest::StatusCode),
}

/// Discovers the gateway and maps `port` (TCP, both sides the same).
pub async fn forward_port(port: u16) -> Result<(), UpnpError> {
    let location = discover_gateway().await?;
    debug!(%location, "gateway found");
    let control_url = fetch_control_url(&location).await?;
    add_port_mapping(&control_url, port).await?;
    info!(port, "listen port mapped on the gateway");
    Ok(())
}

/// Sends an SSDP M-SEARCH for an internet gateway and returns the LOCATION
/// header of the first answer.
async fn discover_gateway() -> Result<String, UpnpError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let search = format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1\r\n\
         \r\n"
    );
    let dest: SocketAddrV4 = format!("{SSDP_MULTICAST}:{SSDP_PORT}")
        .parse()
        .map_err(|_| UpnpError::InvalidResponse("bad multicast address"))?;
    socket.send_to(search.as_bytes(), dest).await?;

    let mut buf = vec![0u8; 2048];
    let (n, _) = timeout(UPNP_DISCOVERY_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| UpnpError::Timeout)??;

    let response = std::str::from_utf8(&buf[..n])
        .map_err(|_| UpnpError::InvalidResponse("response is not utf-8"))?;
    response
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("location")
                .then(|| value.trim().to_string())
        })
        .filter(|location| !location.is_empty())
        .ok_or(UpnpError::InvalidResponse("no location header"))
}

/// Fetches the device description and digs out the WANIPConnection control
/// URL.
async fn fetch_control_url(location: &str) -> Result<String, UpnpError> {
    let body = timeout(UPNP_REQUEST_TIMEOUT, async {
        reqwest::get(location).await?.text().await
    })
    .await
    .map_err(|_| UpnpError::Timeout)??;

    let service = body
        .find(WAN_IP_SERVICE)
        .map(|pos| &body[pos..])
        .ok_or(UpnpError::InvalidResponse("no WANIPConnection service"))?;
    let control = service
        .split_once("<controlURL>")
        .and_then(|(_, rest)| rest.split_once("</controlURL>"))
        .map(|(url, _)| url.trim())
        .ok_or(UpnpError::InvalidResponse("no control url"))?;

    if control.starts_with("http") {
        Ok(control.to_string())
    } else {
        // A relative control path hangs off the description URL's host.
        let base = location
            .find("//")
            .and_then(|scheme| {
                location[scheme + 2..]
                    .find('/')
                    .map(|path| &location[..scheme + 2 + path])
            })
            .unwrap_or(location);
        Ok(format!("{base}{control}"))
    }
}

/// Issues the AddPortMapping SOAP call.
async fn add_port_mapping(control_url: &str, port: u16) -> Result<(), UpnpError> {
    let envelope = format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:AddPortMapping xmlns:u="{WAN_IP_SERVICE}">
<NewRemoteHost></NewRemoteHost>
<NewExternalPort>{port}</NewExternalPort>
<NewProtocol>TCP</NewProtocol>
<NewInternalPort>{port}</NewInternalPort>
<NewInternalClient></NewInternalClient>
<NewEnabled>1</NewEnabled>
<NewPortMappingDescription>riptide</NewPortMappingDescription>
<NewLeaseDuration>0</NewLeaseDuration>
</u:AddPortMapping>
</s:Body>
</s:Envelope>"#
    );

    let client = reqwest::Client::new();
    let response = timeout(
        UPNP_REQUEST_TIMEOUT,
        client
            .post(control_url)
            .header("Content-Type", "text/xml")
            .header(
                "SOAPAction",
                format!("\"{WAN_IP_SERVICE}#AddPortMapping\""),
            )
            .body(envelope)
            .send(),
    )
    .await
    .map_err(|_| UpnpError::Timeout)??;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(UpnpError::Refused(response.status()))
    }
}
