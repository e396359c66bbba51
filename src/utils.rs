pub fn duration_to_ms_string(duration: std::time::Duration) -> String {
    let milliseconds = duration.as_secs_f64() * 1000.0;
    format!("{:.2}ms", milliseconds)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn formats_with_two_decimals() {
        assert_eq!(duration_to_ms_string(Duration::from_micros(1500)), "1.50ms");
        assert_eq!(duration_to_ms_string(Duration::from_secs(2)), "2000.00ms");
    }
}
