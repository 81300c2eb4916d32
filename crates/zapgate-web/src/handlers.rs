use log::warn;
use rocket::{
    Build, Request, Response, Rocket, State,
    fairing::{Fairing, Info, Kind},
    get,
    http::Header,
    routes,
    serde::json::Json,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use zapgate_api::service::{Error, lnurl_service::LnurlServiceApi};
use zapgate_core::lnurl::{InvoiceParams, InvoiceResponse, LnurlError, LnurlStatus, PayParams};

pub struct AppState {
    pub service: Arc<dyn LnurlServiceApi>,
    /// Only set if zaps are enabled
    pub nip05: Option<Nip05>,
}

/// NIP-05 identifier document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nip05 {
    pub names: BTreeMap<String, String>,
}

impl Nip05 {
    pub fn new(username: &str, public_key: &nostr::PublicKey) -> Self {
        Self {
            names: BTreeMap::from([(username.to_owned(), public_key.to_hex())]),
        }
    }
}

#[derive(Debug, rocket::Responder)]
pub enum LnurlFailure {
    #[response(status = 404)]
    NotFound(Json<LnurlError>),
    #[response(status = 400)]
    BadRequest(Json<LnurlError>),
    #[response(status = 500)]
    Internal(Json<LnurlError>),
}

impl LnurlFailure {
    fn unknown_user(username: &str) -> Self {
        warn!("Request for unknown user {username}");
        LnurlFailure::NotFound(Json(LnurlError::new("User not found")))
    }
}

impl From<Error> for LnurlFailure {
    fn from(e: Error) -> Self {
        let body = Json(LnurlError::new(e.to_string()));
        match e {
            Error::Ledger(_) => LnurlFailure::Internal(body),
            _ => LnurlFailure::BadRequest(body),
        }
    }
}

/// LNURL and NIP-05 documents are fetched by browser wallets
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
    }
}

#[get("/.well-known/lnurlp/<username>")]
pub async fn pay_params(
    state: &State<AppState>,
    username: &str,
) -> Result<Json<PayParams>, LnurlFailure> {
    if !state.service.is_known_user(username) {
        return Err(LnurlFailure::unknown_user(username));
    }
    Ok(Json(state.service.pay_params().await?))
}

#[get("/.well-known/lnurlp/<username>/callback?<amount>&<comment>&<nostr>")]
pub async fn callback(
    state: &State<AppState>,
    username: &str,
    amount: Option<u64>,
    comment: Option<String>,
    nostr: Option<String>,
) -> Result<Json<LnurlStatus<InvoiceResponse>>, LnurlFailure> {
    if !state.service.is_known_user(username) {
        return Err(LnurlFailure::unknown_user(username));
    }
    let Some(amount_msat) = amount else {
        return Err(LnurlFailure::BadRequest(Json(LnurlError::new(
            "Invalid amount parameter",
        ))));
    };
    let response = state
        .service
        .create_invoice(InvoiceParams {
            amount_msat,
            comment,
            nostr_zap: nostr,
        })
        .await?;
    Ok(Json(LnurlStatus::ok(response)))
}

#[get("/.well-known/nostr.json?<name>")]
pub fn nostr_json(state: &State<AppState>, name: Option<&str>) -> Option<Json<Nip05>> {
    let nip05 = state.nip05.as_ref()?;
    let names = match name {
        Some(name) => nip05
            .names
            .iter()
            .filter(|(n, _)| n.as_str() == name)
            .map(|(n, key)| (n.clone(), key.clone()))
            .collect(),
        None => nip05.names.clone(),
    };
    Some(Json(Nip05 { names }))
}

pub fn mount(rocket: Rocket<Build>, state: AppState) -> Rocket<Build> {
    rocket
        .manage(state)
        .attach(Cors)
        .mount("/", routes![pay_params, callback, nostr_json])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nostr::Keys;
    use rocket::{http::Status, local::asynchronous::Client};
    use rstest::rstest;
    use serde_json::Value;
    use std::sync::Mutex;
    use zapgate_api::external::ledger::Error as LedgerError;
    use zapgate_core::ServiceTraitBounds;

    /// Records invoice requests. An amount of 0 is out of range, an amount of 1 makes the ledger
    /// fail.
    #[derive(Default)]
    struct FakeLnurlService {
        requests: Mutex<Vec<InvoiceParams>>,
    }

    impl ServiceTraitBounds for FakeLnurlService {}

    #[async_trait]
    impl LnurlServiceApi for FakeLnurlService {
        fn is_known_user(&self, username: &str) -> bool {
            username == "alice"
        }

        async fn pay_params(&self) -> zapgate_api::service::Result<PayParams> {
            Ok(PayParams::new("alice", "example.com", 1000, 1_000_000, 255, None))
        }

        async fn create_invoice(
            &self,
            params: InvoiceParams,
        ) -> zapgate_api::service::Result<InvoiceResponse> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(params.clone());
            match params.amount_msat {
                0 => Err(Error::InvalidAmount {
                    amount: 0,
                    min: 1000,
                    max: 1_000_000,
                }),
                1 => Err(Error::Ledger(LedgerError::FeedNotRunning)),
                amount => Ok(InvoiceResponse::new(format!("lnbc{amount}"))),
            }
        }
    }

    async fn get_client(service: Arc<FakeLnurlService>, nip05: Option<Nip05>) -> Client {
        let state = AppState { service, nip05 };
        Client::tracked(mount(rocket::build(), state))
            .await
            .expect("valid rocket instance")
    }

    #[tokio::test]
    async fn test_pay_params() {
        let client = get_client(Arc::new(FakeLnurlService::default()), None).await;

        let response = client.get("/.well-known/lnurlp/alice").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["tag"], "payRequest");
        assert_eq!(
            body["callback"],
            "https://example.com/.well-known/lnurlp/alice/callback"
        );
        assert_eq!(body["minSendable"], 1000);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let service = Arc::new(FakeLnurlService::default());
        let client = get_client(service.clone(), None).await;

        let response = client.get("/.well-known/lnurlp/bob").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["reason"], "User not found");

        let response = client
            .get("/.well-known/lnurlp/bob/callback?amount=1000")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
        assert!(service.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_creates_invoice() {
        let service = Arc::new(FakeLnurlService::default());
        let client = get_client(service.clone(), None).await;

        let response = client
            .get("/.well-known/lnurlp/alice/callback?amount=21000&comment=thanks%20a%20lot&nostr=%7B%22kind%22%3A9734%7D")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["status"], "OK");
        assert_eq!(body["pr"], "lnbc21000");
        assert_eq!(body["routes"], Value::Array(vec![]));

        let requests = service.requests.lock().unwrap();
        assert_eq!(
            requests.as_slice(),
            &[InvoiceParams {
                amount_msat: 21000,
                comment: Some("thanks a lot".into()),
                nostr_zap: Some("{\"kind\":9734}".into()),
            }]
        );
    }

    #[rstest]
    #[case::missing_amount("/.well-known/lnurlp/alice/callback", Status::BadRequest)]
    #[case::invalid_amount("/.well-known/lnurlp/alice/callback?amount=lots", Status::BadRequest)]
    #[case::out_of_range("/.well-known/lnurlp/alice/callback?amount=0", Status::BadRequest)]
    #[case::ledger_failure("/.well-known/lnurlp/alice/callback?amount=1", Status::InternalServerError)]
    #[tokio::test]
    async fn test_callback_errors(#[case] uri: &str, #[case] status: Status) {
        let client = get_client(Arc::new(FakeLnurlService::default()), None).await;

        let response = client.get(uri.to_owned()).dispatch().await;
        assert_eq!(response.status(), status);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["status"], "ERROR");
        assert!(!body["reason"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nostr_json() {
        let keys = Keys::generate();
        let nip05 = Nip05::new("alice", &keys.public_key());
        let client = get_client(Arc::new(FakeLnurlService::default()), Some(nip05)).await;

        let response = client.get("/.well-known/nostr.json").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
        let body: Nip05 = response.into_json().await.unwrap();
        assert_eq!(body.names["alice"], keys.public_key().to_hex());

        let response = client
            .get("/.well-known/nostr.json?name=bob")
            .dispatch()
            .await;
        let body: Nip05 = response.into_json().await.unwrap();
        assert!(body.names.is_empty());
    }

    #[tokio::test]
    async fn test_nostr_json_without_zaps() {
        let client = get_client(Arc::new(FakeLnurlService::default()), None).await;
        let response = client.get("/.well-known/nostr.json").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
