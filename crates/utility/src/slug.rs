/// Brings a city name into the slug form used by the CityBikes API, e.g.
/// `"New York, NY"` becomes `"NewYork-NY"`.
///
/// Applying it to an already slugged value changes nothing.
pub fn city_slug(city: &str) -> String {
    city.chars()
        .filter(|c| *c != ' ')
        .map(|c| if c == ',' { '-' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("New York, NY", "NewYork-NY")]
    #[case("NewYork-NY", "NewYork-NY")]
    #[case("Kiel", "Kiel")]
    #[case("Washington, DC, US", "Washington-DC-US")]
    #[case("", "")]
    fn slugs(#[case] city: &str, #[case] expected: &str) {
        assert_eq!(city_slug(city), expected);
    }

    #[test]
    fn is_idempotent() {
        let once = city_slug("São Paulo, SP");
        assert_eq!(city_slug(&once), once);
    }
}
