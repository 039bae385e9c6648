/// Maximum username length in bytes.
pub const MAX_USERNAME_LEN: usize = 16;
/// Maximum room-name length in bytes.
pub const MAX_ROOM_NAME_LEN: usize = 32;

const ALLOWED_EXTENSIONS: [&str; 4] = [".txt", ".pdf", ".jpg", ".png"];

/// A name is valid when it is 1 to `max` bytes of ASCII alphanumerics.
pub fn valid_name(name: &str, max: usize) -> bool {
    !name.is_empty() && name.len() <= max && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// A transferable filename is at least `x.ext` long and carries one of the
/// allowed extensions, compared case-sensitively from the last dot.
pub fn valid_filename(filename: &str) -> bool {
    if filename.len() < 5 {
        return false;
    }
    match filename.rfind('.') {
        Some(dot) => ALLOWED_EXTENSIONS.contains(&&filename[dot..]),
        None => false,
    }
}
