#[cfg(test)]
mod cli {
    use std::error::Error;
    use std::io::Write;

    use assert_cmd::cargo::cargo_bin_cmd;
    use predicates::str::contains;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    /// `hata` pointed at `server`, with quick retries and no ambient config
    fn hata(server: &MockServer) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("hata");
        cmd.env_clear()
            .arg("--api-base")
            .arg(server.uri())
            .arg("--retry-wait-time")
            .arg("10ms");
        cmd
    }

    #[tokio::test]
    async fn test_json_report() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-limit", "5")
                    .insert_header("x-ratelimit-remaining", "4")
                    .insert_header("x-ratelimit-reset-after", "30")
                    .set_body_json(json!({"id": "1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let output = hata(&server)
            .args(["--group", "channel_get", "-i", "1", "--format", "json"])
            .arg("channels/1")
            .output()?;
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(report["successful"], 1);
        assert_eq!(report["handler"]["size"], 5);
        assert_eq!(report["handler"]["cooling_down"], 1);
        assert_eq!(report["outcomes"][0]["status"], 200);
        assert_eq!(report["outcomes"][0]["remaining"], 4);
        assert_eq!(report["outcomes"][0]["body"], r#"{"id":"1"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn test_token_from_env() {
        let server = MockServer::start().await;
        Mock::given(header("authorization", "Bot from-env"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        hata(&server)
            .env("DISCORD_TOKEN", "from-env")
            .arg("users/@me")
            .assert()
            .success()
            .stdout(contains("1 Total, 1 OK, 0 Errors"));
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Channel"))
            .mount(&server)
            .await;

        hata(&server)
            .arg("channels/404")
            .assert()
            .failure()
            .code(2)
            .stdout(contains("[404]"))
            .stdout(contains("Unknown Channel"))
            .stdout(contains("1 Total, 0 OK, 1 Errors"));
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"retry_after": 20, "global": false})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        hata(&server)
            .args(["--group", "guild_get", "-i", "7"])
            .arg("guilds/7")
            .assert()
            .success()
            .stdout(contains("[200]"));

        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/5/messages"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"content": "hello"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        hata(&server)
            .args(["-X", "post", "-g", "message_create", "-i", "5", "-n", "3"])
            .args(["--data", r#"{"content": "hello"}"#])
            .arg("channels/5/messages")
            .assert()
            .success()
            .stdout(contains("3 Total, 3 OK, 0 Errors"));
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = MockServer::start().await;

        hata(&server)
            .args(["-X", "post", "--data", "{not json"])
            .arg("channels/5/messages")
            .assert()
            .failure()
            .code(1)
            .stderr(contains("Request body is not valid JSON"));

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let server = MockServer::start().await;

        hata(&server)
            .args(["--group", "does_not_exist"])
            .arg("channels/1")
            .assert()
            .failure()
            .code(1)
            .stderr(contains("Unknown rate limit group `does_not_exist`"));
    }

    #[tokio::test]
    async fn test_config_file() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(header("x-audit-log-reason", "cleanup"))
            .and(header("authorization", "Bot from-file"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = NamedTempFile::new()?;
        writeln!(config, r#"token = "from-file""#)?;
        writeln!(config, r#"header = {{ x-audit-log-reason = "cleanup" }}"#)?;

        hata(&server)
            .arg("--config")
            .arg(config.path())
            .arg("channels/1")
            .assert()
            .success();
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_config_file() -> Result<()> {
        let server = MockServer::start().await;

        let mut config = NamedTempFile::new()?;
        writeln!(config, "follow_redirects = true")?;

        hata(&server)
            .arg("--config")
            .arg(config.path())
            .arg("channels/1")
            .assert()
            .failure()
            .code(3)
            .stderr(contains("Cannot load configuration file"));
        Ok(())
    }
}
