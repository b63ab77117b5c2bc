#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Letters-only input must survive a round trip
    let letters: String = data
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let digits = irrfind::utils::text_to_digits(&letters);
    assert_eq!(irrfind::utils::digits_to_text(&digits).as_deref(), Some(letters.as_str()));

    // Arbitrary input never panics
    let _ = irrfind::utils::digits_to_text(data);
    assert!(irrfind::utils::is_digit_string(irrfind::utils::text_to_digits(data).as_bytes(), 10));
});
