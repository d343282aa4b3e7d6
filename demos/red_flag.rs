use chrono::Utc;
use firewx::{
    Comparator, FieldId, FireWx, FireWxError, RetrievalMode, RetrievalRequest, SourceFamily,
    ThresholdTest, truncate_to_hour,
};

#[tokio::main]
async fn main() -> Result<(), FireWxError> {
    let client = FireWx::from_config_file("demos/firewx.toml").await?;

    let request = RetrievalRequest::builder()
        .field(FieldId::RelativeHumidity)
        .domain("conus")
        .requested(truncate_to_hour(Utc::now()))
        .family(SourceFamily::GriddedAnalysis)
        .mode(RetrievalMode::ThresholdMask(vec![
            ThresholdTest::new(FieldId::Temperature, Comparator::GreaterOrEqual, 75.0),
            ThresholdTest::new(FieldId::RelativeHumidity, Comparator::LessOrEqual, 25.0),
            ThresholdTest::new(FieldId::WindSpeed, Comparator::GreaterOrEqual, 15.0),
        ]))
        .build();

    let outcome = client.product(&request).await?;
    for degradation in &outcome.degradations {
        println!("degraded: {}", degradation);
    }
    if let Some(mask) = outcome.as_mask() {
        println!(
            "{} valid {}: {} of {} cells flagged",
            mask.description,
            outcome.valid_time,
            mask.count_true(),
            mask.values.len()
        );
    }

    let temperature = client
        .retrieve()
        .field(FieldId::Temperature)
        .domain("conus")
        .requested(outcome.valid_time)
        .call()
        .await?;
    match client.sync().grid(&temperature.field).call().await {
        Ok(pair) => println!(
            "{} of {} stations shown at {}",
            pair.snapshot.visible_count(),
            pair.snapshot.records.len(),
            pair.resolved_observation_time
        ),
        Err(e) => println!("No observation overlay: {}", e),
    }

    Ok(())
}
