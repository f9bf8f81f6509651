use std::net::IpAddr;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mesh_cni_ipam::ReleaseOutcome;
use serde::{Deserialize, Serialize};

use crate::server::IpamServer;
use crate::{Error, Result};

/// Router state. `None` when no pools are configured, in which case every
/// request is answered as if the allocator had granted it.
#[derive(Clone, Default)]
pub struct ApiState {
    ipam: Option<IpamServer>,
}

impl ApiState {
    pub fn new(ipam: IpamServer) -> Self {
        Self { ipam: Some(ipam) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAcquireRequest {
    pub cidr: String,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub pre_allocated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkReply {
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseReply {
    /// False while the grace period defers the release.
    pub released: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableReply {
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworksReply {
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAcquireRequest {
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReleaseRequest {
    pub cidr: String,
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReply {
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpsReply {
    pub ips: Vec<IpAddr>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/networks", get(list_networks))
        .route("/v1/networks/acquire", post(network_acquire))
        .route("/v1/networks/release", post(network_release))
        .route("/v1/networks/available", post(network_available))
        .route("/v1/ips", get(list_ips))
        .route("/v1/ips/acquire", post(ip_acquire))
        .route("/v1/ips/release", post(ip_release))
        .route("/v1/debug/tree", get(tree))
        .with_state(state)
}

async fn network_acquire(
    State(state): State<ApiState>,
    Json(req): Json<NetworkAcquireRequest>,
) -> Result<Json<NetworkReply>> {
    let Some(ipam) = state.ipam else {
        return Ok(Json(NetworkReply { cidr: req.cidr }));
    };
    let network = ipam.network_acquire(&req.cidr, req.immutable, req.pre_allocated)?;
    Ok(Json(NetworkReply {
        cidr: network.to_string(),
    }))
}

async fn network_release(
    State(state): State<ApiState>,
    Json(req): Json<NetworkRequest>,
) -> Result<Json<ReleaseReply>> {
    let released = match state.ipam {
        Some(ipam) => !matches!(
            ipam.network_release(&req.cidr)?,
            ReleaseOutcome::Pending
        ),
        None => true,
    };
    Ok(Json(ReleaseReply { released }))
}

async fn network_available(
    State(state): State<ApiState>,
    Json(req): Json<NetworkRequest>,
) -> Result<Json<AvailableReply>> {
    let available = match state.ipam {
        Some(ipam) => ipam.network_is_available(&req.cidr)?,
        None => true,
    };
    Ok(Json(AvailableReply { available }))
}

async fn list_networks(State(state): State<ApiState>) -> Result<Json<NetworksReply>> {
    let networks = match state.ipam {
        Some(ipam) => ipam
            .list_networks()?
            .iter()
            .map(ToString::to_string)
            .collect(),
        None => Vec::new(),
    };
    Ok(Json(NetworksReply { networks }))
}

async fn ip_acquire(
    State(state): State<ApiState>,
    Json(req): Json<IpAcquireRequest>,
) -> Result<Json<IpReply>> {
    let ip = match state.ipam {
        Some(ipam) => ipam.ip_acquire(&req.cidr, req.ip.as_deref())?,
        None => {
            let ip = req.ip.ok_or_else(|| Error::InvalidAddress {
                addr: String::new(),
                reason: "an address is required while IPAM is disabled".into(),
            })?;
            crate::server::parse::parse_ip(&ip)?
        }
    };
    Ok(Json(IpReply { ip }))
}

async fn ip_release(
    State(state): State<ApiState>,
    Json(req): Json<IpReleaseRequest>,
) -> Result<Json<ReleaseReply>> {
    let released = match state.ipam {
        Some(ipam) => !matches!(
            ipam.ip_release(&req.cidr, &req.ip)?,
            ReleaseOutcome::Pending
        ),
        None => true,
    };
    Ok(Json(ReleaseReply { released }))
}

#[derive(Debug, Deserialize)]
struct IpsQuery {
    cidr: String,
}

async fn list_ips(
    State(state): State<ApiState>,
    Query(query): Query<IpsQuery>,
) -> Result<Json<IpsReply>> {
    let ips = match state.ipam {
        Some(ipam) => ipam.list_ips(&query.cidr)?,
        None => Vec::new(),
    };
    Ok(Json(IpsReply { ips }))
}

async fn tree(State(state): State<ApiState>) -> Result<String> {
    match state.ipam {
        Some(ipam) => ipam.to_dot(),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use ipnetwork::IpNetwork;
    use mesh_cni_ipam::Ipam;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::http::Reply;
    use crate::metrics::IpamMetrics;

    fn enabled() -> Router {
        let pool: IpNetwork = "10.0.0.0/16".parse().unwrap();
        let server = IpamServer::new(
            Ipam::new([pool]).unwrap(),
            Duration::ZERO,
            IpamMetrics::default(),
        );
        router(ApiState::new(server))
    }

    async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(router, req).await
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
        send(router, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let router = enabled();
        let (status, body) = post_json(
            &router,
            "/v1/networks/acquire",
            json!({"cidr": "10.0.1.0/24", "immutable": true, "preAllocated": 2}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"cidr": "10.0.1.0/24"}));

        let (_, body) = get_json(&router, "/v1/ips?cidr=10.0.1.0/24").await;
        assert_eq!(body, json!({"ips": ["10.0.1.0", "10.0.1.1"]}));

        let (status, body) = post_json(
            &router,
            "/v1/ips/acquire",
            json!({"cidr": "10.0.1.0/24"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ip": "10.0.1.2"}));

        let (_, body) = get_json(&router, "/v1/networks").await;
        assert_eq!(body, json!({"networks": ["10.0.1.0/24"]}));

        let (_, body) = post_json(
            &router,
            "/v1/networks/available",
            json!({"cidr": "10.0.1.0/24"}),
        )
        .await;
        assert_eq!(body, json!({"available": false}));

        let (status, body) = post_json(
            &router,
            "/v1/networks/release",
            json!({"cidr": "10.0.1.0/24"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"released": true}));

        let (_, body) = post_json(
            &router,
            "/v1/networks/available",
            json!({"cidr": "10.0.1.0/24"}),
        )
        .await;
        assert_eq!(body, json!({"available": true}));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let router = enabled();
        let (status, body) = post_json(
            &router,
            "/v1/networks/acquire",
            json!({"cidr": "10.0.0.1/24"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let reply: Reply = serde_json::from_value(body).unwrap();
        assert_eq!(reply.status, "fail");
        assert!(reply.message.is_some());

        let (status, _) = post_json(
            &router,
            "/v1/networks/acquire",
            json!({"cidr": "192.168.0.0/24"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        post_json(
            &router,
            "/v1/networks/acquire",
            json!({"cidr": "10.0.0.0/30", "immutable": true}),
        )
        .await;
        let (status, _) = post_json(
            &router,
            "/v1/networks/acquire",
            json!({"cidr": "10.0.0.0/30", "immutable": true}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = post_json(
            &router,
            "/v1/ips/acquire",
            json!({"cidr": "10.0.0.0/30", "ip": "10.0.0.9"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for _ in 0..4 {
            let (status, _) =
                post_json(&router, "/v1/ips/acquire", json!({"cidr": "10.0.0.0/30"})).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) =
            post_json(&router, "/v1/ips/acquire", json!({"cidr": "10.0.0.0/30"})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let router = router(ApiState::disabled());
        let (status, body) = post_json(
            &router,
            "/v1/networks/acquire",
            json!({"cidr": "172.16.0.0/24"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"cidr": "172.16.0.0/24"}));

        let (_, body) = post_json(
            &router,
            "/v1/ips/acquire",
            json!({"cidr": "172.16.0.0/24", "ip": "172.16.0.4"}),
        )
        .await;
        assert_eq!(body, json!({"ip": "172.16.0.4"}));

        let (status, _) = post_json(
            &router,
            "/v1/ips/acquire",
            json!({"cidr": "172.16.0.0/24"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = post_json(
            &router,
            "/v1/ips/release",
            json!({"cidr": "172.16.0.0/24", "ip": "172.16.0.4"}),
        )
        .await;
        assert_eq!(body, json!({"released": true}));

        let (_, body) = get_json(&router, "/v1/networks").await;
        assert_eq!(body, json!({"networks": []}));
    }
}
