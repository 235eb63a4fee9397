//! Human-readable rendering.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use weather_core::{AirQuality, Location, Pollen, SourceRegistry, Weather};

const DAYS_SHOWN: usize = 5;
const HOURS_SHOWN: usize = 12;

pub fn print_providers(registry: &SourceRegistry) {
    for source in registry.sources() {
        let capabilities: Vec<&str> = source.capabilities().iter().map(|c| c.as_str()).collect();
        let features: Vec<&str> = source.supported_features().iter().map(|f| f.as_str()).collect();
        let state = if source.is_configured() { "configured" } else { "not configured" };

        println!("{} ({}) [{state}]", source.id(), source.name());
        println!("  capabilities: {}", capabilities.join(", "));
        println!("  features:     {}", features.join(", "));
    }
}

pub fn print_locations(locations: &[Location]) {
    if locations.is_empty() {
        println!("No saved locations. Create one with `weather show <name> --lat <lat> --lon <lon>`.");
        return;
    }

    for location in locations {
        let refreshed = location
            .weather
            .as_ref()
            .map(|w| local_time(w.refresh_time, location.timezone))
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{:<16} {:<32} {:<12} refreshed {refreshed}",
            location.id,
            location.display_name(),
            location.main_source,
        );
    }
}

pub fn print_weather(location: &Location, weather: &Weather) {
    let tz = location.timezone;
    println!("{} via {}", location.display_name(), location.main_source);

    if let Some(current) = &weather.current {
        let mut line = format!("Now: {}", temperature(current.temperature_c));
        if let Some(feels) = current.feels_like_c {
            line.push_str(&format!(" (feels like {feels:.1}°C)"));
        }
        if let Some(condition) = &current.condition {
            line.push_str(&format!(", {condition}"));
        }
        if let Some(humidity) = current.humidity_pct {
            line.push_str(&format!(", humidity {humidity}%"));
        }
        if let Some(wind) = current.wind_speed_mps {
            line.push_str(&format!(", wind {wind:.1} m/s"));
        }
        println!("{line}");

        if let Some(aq) = &current.air_quality {
            println!("Air quality: {}", air_quality(aq));
        }
        if let Some(pollen) = &current.pollen {
            println!("Pollen: {}", pollen_summary(pollen));
        }
    }

    if !weather.daily.is_empty() {
        println!();
        println!("Daily:");
        for day in weather.daily.iter().take(DAYS_SHOWN) {
            let mut line = format!(
                "  {}  {} .. {}",
                day.date,
                temperature(day.temperature_min_c),
                temperature(day.temperature_max_c)
            );
            if let Some(condition) = &day.condition {
                line.push_str(&format!("  {condition}"));
            }
            if let Some(aq) = &day.air_quality {
                line.push_str(&format!("  AQ {}", air_quality(aq)));
            }
            if let Some(pollen) = &day.pollen {
                line.push_str(&format!("  pollen {}", pollen_summary(pollen)));
            }
            println!("{line}");
        }
    }

    let upcoming: Vec<_> = weather.hourly.iter().filter(|h| h.time >= weather.refresh_time).collect();
    if !upcoming.is_empty() {
        println!();
        println!("Next hours:");
        for hour in upcoming.into_iter().take(HOURS_SHOWN) {
            let condition = hour.condition.as_deref().unwrap_or("");
            println!("  {}  {:>8}  {condition}", hour.time.with_timezone(&tz).format("%H:%M"), temperature(hour.temperature_c));
        }
    }

    if !weather.alerts.is_empty() {
        println!();
        println!("Alerts:");
        for alert in &weather.alerts {
            let until = alert.end.map(|end| format!(" until {}", local_time(end, tz))).unwrap_or_default();
            println!("  [{:?}] {}{until}", alert.severity, alert.headline);
        }
    }

    for (feature, err) in &weather.failures {
        eprintln!("warning: {feature} unavailable: {err}");
    }
}

fn local_time(time: DateTime<Utc>, tz: Tz) -> String {
    time.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string()
}

fn temperature(value: Option<f64>) -> String {
    value.map(|t| format!("{t:.1}°C")).unwrap_or_else(|| "-".to_string())
}

fn air_quality(aq: &AirQuality) -> String {
    match (aq.index(), aq.name()) {
        (Some(index), Some(name)) => format!("{index} {name}"),
        _ => "n/a".to_string(),
    }
}

fn pollen_summary(pollen: &Pollen) -> String {
    match (pollen.index(), pollen.name()) {
        (Some(index), Some(name)) => format!("{index} {name}"),
        _ => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn air_quality_label() {
        let aq = AirQuality { pm25: Some(10.0), ..Default::default() };
        assert_eq!(air_quality(&aq), "35 Fair");
        assert_eq!(air_quality(&AirQuality::default()), "n/a");
    }

    #[test]
    fn missing_temperature_is_a_dash() {
        assert_eq!(temperature(None), "-");
        assert_eq!(temperature(Some(3.14)), "3.1°C");
    }
}
