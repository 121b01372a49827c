// mot-summary-rs/src/tests.rs
// Tests for the MOT summary service: record validation, summary rendering,
// prompt construction, stream parsing and the per-request stream registry.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::stream;
    use serde_json::json;

    use crate::llm_client::{build_prompt, LLMError, SummaryStream, SUMMARY_PROMPT_PREFIX};
    use crate::mot_client::{AccessToken, MotApiError, MotClient, MotCredentials, VehicleRecord};
    use crate::stream_registry::{StreamRegistry, MAX_PENDING_STREAMS};
    use crate::summary::{
        generate_summary, parse_mot_test, validate_mot_test, SummaryOutcome, TestRejection,
        NO_MOT_DATA_MESSAGE,
    };

    fn record_from(value: serde_json::Value) -> VehicleRecord {
        serde_json::from_value(value).expect("test record should deserialize")
    }

    fn valid_test(date: &str) -> serde_json::Value {
        json!({
            "completedDate": date,
            "testResult": "PASSED",
            "odometerValue": "45000",
            "odometerUnit": "mi",
            "defects": []
        })
    }

    #[test]
    fn test_empty_mot_tests_returns_sentinel() {
        let record = record_from(json!({
            "registration": "AB12CDE",
            "motTests": []
        }));
        let outcome = generate_summary(&record);
        assert!(outcome.is_empty());
        assert_eq!(outcome.text(), NO_MOT_DATA_MESSAGE);
        assert_eq!(outcome.text(), "No MoT test data available for this vehicle.");

        // Missing motTests entirely behaves the same as an empty list
        let record = record_from(json!({ "registration": "AB12CDE" }));
        assert_eq!(generate_summary(&record), SummaryOutcome::Empty);
    }

    #[test]
    fn test_validator_rejects_malformed_records() {
        // Not an object
        assert!(!validate_mot_test(&json!(["not", "a", "record"])));
        assert!(!validate_mot_test(&json!("scalar")));

        // Missing completedDate
        assert!(!validate_mot_test(&json!({ "testResult": "PASSED" })));

        // completedDate present but not a string
        assert!(!validate_mot_test(&json!({
            "completedDate": 20210501,
            "testResult": "PASSED"
        })));

        // testResult outside the strict enum, including lowercase
        assert!(!validate_mot_test(&json!({
            "completedDate": "2021-05-01",
            "testResult": "passed"
        })));
        assert!(!validate_mot_test(&json!({
            "completedDate": "2021-05-01",
            "testResult": "RETEST"
        })));
        assert!(!validate_mot_test(&json!({ "completedDate": "2021-05-01" })));

        // Non-numeric odometer value
        assert!(!validate_mot_test(&json!({
            "completedDate": "2021-05-01",
            "testResult": "PASSED",
            "odometerValue": "12k miles"
        })));
    }

    #[test]
    fn test_float_odometer_value_is_rejected() {
        let test = json!({
            "completedDate": "2021-05-01",
            "testResult": "PASSED",
            "odometerValue": 45000.5
        });
        assert!(!validate_mot_test(&test));
        assert_eq!(
            parse_mot_test(&test).unwrap_err(),
            TestRejection::NonNumericOdometer
        );
    }

    #[test]
    fn test_validator_accepts_well_formed_records() {
        assert!(validate_mot_test(&valid_test("2021-05-01")));

        // Numeric odometer values are fine too
        assert!(validate_mot_test(&json!({
            "completedDate": "2021-05-01",
            "testResult": "FAILED",
            "odometerValue": 45000
        })));

        // Odometer is optional
        assert!(validate_mot_test(&json!({
            "completedDate": "2021-05-01",
            "testResult": "PASSED"
        })));
    }

    #[test]
    fn test_rejection_reasons_are_structured() {
        assert_eq!(
            parse_mot_test(&json!(42)).unwrap_err(),
            TestRejection::NotAnObject
        );
        assert_eq!(
            parse_mot_test(&json!({ "testResult": "PASSED" })).unwrap_err(),
            TestRejection::MissingCompletedDate
        );
        assert_eq!(
            parse_mot_test(&json!({
                "completedDate": "2021-05-01",
                "testResult": "Passed"
            }))
            .unwrap_err(),
            TestRejection::InvalidTestResult
        );
        assert_eq!(
            parse_mot_test(&json!({
                "completedDate": "2021-05-01",
                "testResult": "PASSED",
                "odometerValue": "unknown"
            }))
            .unwrap_err(),
            TestRejection::NonNumericOdometer
        );
    }

    #[test]
    fn test_invalid_records_are_dropped_but_siblings_render() {
        let record = record_from(json!({
            "registration": "AB12CDE",
            "motTests": [
                valid_test("2020-05-01"),
                { "completedDate": "2021-05-01", "testResult": "passed" },
                valid_test("2022-05-01")
            ]
        }));

        let text = generate_summary(&record).text().to_string();
        assert!(text.contains("Test Date: 2020-05-01"));
        assert!(text.contains("Test Date: 2022-05-01"));
        assert!(!text.contains("Test Date: 2021-05-01"));
    }

    #[test]
    fn test_tests_render_in_original_order() {
        let record = record_from(json!({
            "motTests": [
                valid_test("2020-01-01"),
                valid_test("2022-01-01"),
                valid_test("2021-01-01")
            ]
        }));

        let text = generate_summary(&record).text().to_string();
        let first = text.find("2020-01-01").expect("first test missing");
        let second = text.find("2022-01-01").expect("second test missing");
        let third = text.find("2021-01-01").expect("third test missing");
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn test_summary_is_idempotent() {
        let record = record_from(json!({
            "registration": "AB12CDE",
            "make": "Ford",
            "motTests": [valid_test("2021-05-01")]
        }));

        let first = generate_summary(&record);
        let second = generate_summary(&record);
        assert_eq!(first, second);
        assert_eq!(first.text(), second.text());
    }

    #[test]
    fn test_missing_header_fields_default_independently() {
        let record = record_from(json!({
            "registration": "AB12CDE",
            "model": "Fiesta",
            "motTests": [valid_test("2021-05-01")]
        }));

        let text = generate_summary(&record).text().to_string();
        assert!(text.contains("Vehicle Registration: AB12CDE\n"));
        assert!(text.contains("Make: Unknown\n"));
        assert!(text.contains("Model: Fiesta\n"));
        assert!(text.contains("First Registered: Unknown\n"));
    }

    #[test]
    fn test_single_passing_test_scenario() {
        let record = record_from(json!({
            "registration": "AB12CDE",
            "make": "Ford",
            "model": "Fiesta",
            "firstUsedDate": "2015-01-01",
            "motTests": [{
                "completedDate": "2021-05-01",
                "testResult": "PASSED",
                "odometerValue": "45000",
                "odometerUnit": "mi",
                "defects": []
            }]
        }));

        let text = generate_summary(&record).text().to_string();
        assert!(text.contains("Vehicle Registration: AB12CDE\n"));
        assert!(text.contains("Make: Ford\n"));
        assert!(text.contains("Model: Fiesta\n"));
        assert!(text.contains("First Registered: 2015-01-01\n"));
        assert!(text.contains("- Test Date: 2021-05-01, Result: Pass\n"));
        assert!(text.contains("Mileage: 45000 mi"));
        assert!(!text.contains("Defect:"));
    }

    #[test]
    fn test_defect_lines_render_with_defaults() {
        let record = record_from(json!({
            "motTests": [{
                "completedDate": "2021-05-01",
                "testResult": "FAILED",
                "odometerValue": "45000",
                "odometerUnit": "mi",
                "defects": [
                    { "text": "Brake disc worn", "type": "MAJOR", "dangerous": true },
                    { "text": "Tyre slightly damaged" }
                ]
            }]
        }));

        let text = generate_summary(&record).text().to_string();
        assert!(text.contains("Result: Fail\n"));
        assert!(text.contains("Defect: Brake disc worn (Type: MAJOR, Dangerous: true)\n"));
        assert!(text.contains("Defect: Tyre slightly damaged (Type: N/A, Dangerous: N/A)\n"));
    }

    #[test]
    fn test_prompt_has_fixed_prefix() {
        let prompt = build_prompt("Vehicle Registration: AB12CDE");
        assert_eq!(
            prompt,
            "Summarize the following vehicle MOT history:\n\nVehicle Registration: AB12CDE"
        );
        assert!(prompt.starts_with(SUMMARY_PROMPT_PREFIX));
    }

    #[test]
    fn test_empty_token_fails_before_any_network_call() {
        let credentials = MotCredentials::new(
            "client-id",
            "client-secret",
            "https://example.test/scope",
            "https://example.test/token",
            "api-key",
        );
        // Unroutable base URL: a network attempt would fail differently,
        // the guard must reject the empty token first.
        let client = MotClient::with_credentials(credentials, "http://127.0.0.1:9".to_string())
            .expect("client should build");

        let result =
            tokio_test::block_on(client.fetch_vehicle("AB12CDE", &AccessToken::new("")));
        assert!(matches!(result, Err(MotApiError::Auth(_))));
    }

    #[test]
    fn test_client_builds_with_valid_configuration() {
        let credentials = MotCredentials::new(
            "client-id",
            "client-secret",
            "https://example.test/scope",
            "https://example.test/token",
            "api-key",
        );
        assert!(MotClient::with_credentials(credentials, "https://example.test".to_string()).is_ok());
    }

    fn sse_chunk(parts: &[&str]) -> Bytes {
        Bytes::from(parts.join(""))
    }

    #[test]
    fn test_stream_yields_fragments_in_order() {
        let chunks = vec![
            Ok(sse_chunk(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"This \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"vehicle\"}}]}\n\n",
            ])),
            // A payload split across two network chunks
            Ok(sse_chunk(&["data: {\"choices\":[{\"delta\":{\"con"])),
            Ok(sse_chunk(&["tent\":\" passed.\"}}]}\n\n", "data: [DONE]\n\n"])),
        ];
        let mut summary_stream = SummaryStream::new(stream::iter(chunks));

        tokio_test::block_on(async {
            let mut collected = String::new();
            while let Some(fragment) = summary_stream.next_fragment().await {
                collected.push_str(&fragment.expect("no errors in this stream"));
            }
            assert_eq!(collected, "This vehicle passed.");

            // Finished streams stay finished
            assert!(summary_stream.next_fragment().await.is_none());
        });
    }

    #[test]
    fn test_long_replies_are_delivered_completely() {
        // Every fragment of a lengthy reply must arrive, followed by a
        // clean end of stream rather than a truncation error.
        let mut chunks: Vec<Result<Bytes, LLMError>> = (0..12)
            .map(|i| {
                Ok(Bytes::from(format!(
                    "data: {{\"choices\":[{{\"delta\":{{\"content\":\"part{} \"}}}}]}}\n\n",
                    i
                )))
            })
            .collect();
        chunks.push(Ok(sse_chunk(&["data: [DONE]\n\n"])));
        let mut summary_stream = SummaryStream::new(stream::iter(chunks));

        tokio_test::block_on(async {
            let mut fragments = Vec::new();
            while let Some(fragment) = summary_stream.next_fragment().await {
                fragments.push(fragment.expect("no errors in this stream"));
            }
            assert_eq!(fragments.len(), 12);
            assert_eq!(fragments.first().map(String::as_str), Some("part0 "));
            assert_eq!(fragments.last().map(String::as_str), Some("part11 "));
        });
    }

    #[test]
    fn test_stream_stops_at_done_marker() {
        let chunks = vec![Ok(sse_chunk(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"only\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]))];
        let mut summary_stream = SummaryStream::new(stream::iter(chunks));

        tokio_test::block_on(async {
            let first = summary_stream.next_fragment().await;
            assert_eq!(first.map(Result::unwrap), Some("only".to_string()));
            assert!(summary_stream.next_fragment().await.is_none());
        });
    }

    #[test]
    fn test_stream_error_is_terminal() {
        let chunks = vec![
            Ok(sse_chunk(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
            ])),
            Err(LLMError::NetworkError("connection reset".to_string())),
        ];
        let mut summary_stream = SummaryStream::new(stream::iter(chunks));

        tokio_test::block_on(async {
            let first = summary_stream.next_fragment().await;
            assert_eq!(first.map(Result::unwrap), Some("partial".to_string()));

            let second = summary_stream.next_fragment().await;
            assert!(matches!(second, Some(Err(LLMError::NetworkError(_)))));

            // The error is reported once; afterwards the stream is over.
            assert!(summary_stream.next_fragment().await.is_none());
        });
    }

    fn empty_summary_stream() -> SummaryStream {
        SummaryStream::new(stream::empty::<Result<Bytes, LLMError>>())
    }

    #[tokio::test]
    async fn test_registry_streams_are_claimed_once() {
        let registry = StreamRegistry::new();
        let id = registry.insert(empty_summary_stream()).await;

        assert!(registry.claim(&id).await.is_some());
        assert!(registry.claim(&id).await.is_none());
        assert_eq!(registry.len().await, 0);

        // Unknown ids are simply absent
        assert!(registry.claim(&uuid::Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_registry_evicts_oldest_when_full() {
        let registry = StreamRegistry::new();

        let first = registry.insert(empty_summary_stream()).await;
        for _ in 1..MAX_PENDING_STREAMS {
            registry.insert(empty_summary_stream()).await;
        }
        assert_eq!(registry.len().await, MAX_PENDING_STREAMS);

        // One more pushes the oldest entry out
        let newest = registry.insert(empty_summary_stream()).await;
        assert_eq!(registry.len().await, MAX_PENDING_STREAMS);
        assert!(registry.claim(&first).await.is_none());
        assert!(registry.claim(&newest).await.is_some());
    }
}
