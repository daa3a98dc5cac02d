#![no_main]

use libfuzzer_sys::fuzz_target;

use http::header::{AGE, CACHE_CONTROL, EXPIRES, VARY};
use http::{HeaderMap, HeaderValue};

use staleguard::directives;
use staleguard::{CacheControl, Vary};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = HeaderValue::from_bytes(data) else {
        return;
    };

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, value.clone());
    headers.insert(VARY, value.clone());
    headers.insert(AGE, value.clone());
    headers.insert(EXPIRES, value);

    // Parsing must never panic, whatever the header bytes are.
    let _ = CacheControl::parse(&headers);
    let _ = Vary::parse(&headers);
    let _ = directives::parse_age(&headers);
    let _ = directives::parse_date_header(&headers, EXPIRES);
    let _ = directives::parse_etag(&headers);
    let _ = directives::has_pragma_no_cache(&headers);
});
