//! Identity resolution tests: strategy lookup and linkset fetching against a
//! mock resolver.

use credential_conformance::{ErrorCode, IdentityProviderStrategy, StrategyRegistry};

const GTIN: &str = "09359502000010";

mod registry {
    use super::*;

    #[test]
    fn known_and_unknown_keys_both_resolve() {
        let registry = StrategyRegistry::default();

        let gs1 = registry.strategy("gs1");
        let fallback = registry.strategy("unknown-key");

        assert_eq!(gs1.provider_type(), "gs1");
        assert_eq!(fallback.provider_type(), "gs1");
        assert!(fallback.dlr_url(GTIN, "https://id.example.org").is_some());
    }

    #[test]
    fn malformed_codes_yield_none() {
        let strategy = StrategyRegistry::default().strategy("gs1");

        for code in ["", "abc", "123", "09359502000011", "(01)0935", "(10)ABC"] {
            assert_eq!(
                strategy.dlr_url(code, "https://id.example.org"),
                None,
                "code {code:?}"
            );
        }
        assert_eq!(strategy.dlr_url(GTIN, "not a url"), None);
        assert_eq!(strategy.dlr_url(GTIN, "ftp://id.example.org"), None);
    }

    #[test]
    fn scanner_output_becomes_a_resolvable_code() {
        let strategy = StrategyRegistry::default().strategy("gs1");

        let code = strategy.code("9359502000010", "EAN_13");
        assert_eq!(code, "(01)09359502000010");
        assert_eq!(
            strategy.dlr_url(&code, "https://id.example.org/").as_deref(),
            Some("https://id.example.org/01/09359502000010")
        );
    }
}

#[cfg(feature = "remote")]
mod resolver {
    use super::*;
    use credential_conformance::{Gs1Strategy, LinkResolver};
    use mockito::Matcher;
    use std::time::Duration;

    fn linkset_path() -> String {
        format!("/01/{GTIN}")
    }

    #[tokio::test]
    async fn fetches_linkset() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", linkset_path().as_str())
            .match_query(Matcher::UrlEncoded("linkType".into(), "all".into()))
            .match_header("accept", Matcher::Regex("linkset\\+json".into()))
            .with_status(200)
            .with_header("content-type", "application/linkset+json")
            .with_body(r#"{"linkset":[{"anchor":"https://id.example.org/01/09359502000010"}]}"#)
            .create_async()
            .await;

        let link = LinkResolver::new()
            .unwrap()
            .resolve(&Gs1Strategy, GTIN, &server.url())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(link.url, format!("{}/01/{GTIN}", server.url()));
        assert!(link.linkset["linkset"].is_array());
    }

    #[tokio::test]
    async fn not_found_maps_to_link_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", linkset_path().as_str())
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let err = LinkResolver::new()
            .unwrap()
            .resolve(&Gs1Strategy, GTIN, &server.url())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::IdrLinkNotFound);
        assert_eq!(err.status_code, 404);
        assert_eq!(err.context["identifier"], GTIN);
    }

    #[tokio::test]
    async fn server_error_maps_to_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", linkset_path().as_str())
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = LinkResolver::new()
            .unwrap()
            .resolve(&Gs1Strategy, GTIN, &server.url())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::IdrUpstreamError);
        assert_eq!(err.status_code, 502);
        assert_eq!(err.context["upstreamStatus"], 503);
    }

    #[tokio::test]
    async fn invalid_code_never_reaches_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = LinkResolver::new()
            .unwrap()
            .resolve(&Gs1Strategy, "not-a-gtin", &server.url())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(err.code, ErrorCode::IdrInvalidCode);
    }

    #[tokio::test]
    async fn silent_resolver_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let err = LinkResolver::with_timeout(Duration::from_millis(200))
            .unwrap()
            .resolve(&Gs1Strategy, GTIN, &format!("http://{addr}"))
            .await
            .unwrap_err();

        hold.abort();
        assert_eq!(err.code, ErrorCode::IdrTimeout);
        assert_eq!(err.status_code, 504);
    }
}
