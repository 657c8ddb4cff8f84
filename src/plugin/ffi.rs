//! Small helpers for the C strings the native plugin APIs hand back.

use std::ffi::c_char;

/// Read a null-terminated C string from a fixed-size char array.
pub fn read_cstr(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cstr_stops_at_nul() {
        let mut buf = [0 as c_char; 8];
        for (slot, b) in buf.iter_mut().zip(b"Q10\0junk") {
            *slot = *b as c_char;
        }
        assert_eq!(read_cstr(&buf), "Q10");

        let full = [b'A' as c_char; 4];
        assert_eq!(read_cstr(&full), "AAAA");
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("x".into()), Some("x".to_string()));
    }
}
