// Hard caps that keep one misbehaving client from exhausting a shop's memory.

/// Max loaded shops (engines) per server.
pub const MAX_SHOPS: usize = 256;
/// Max shop (database) name length before sanitizing.
pub const MAX_SHOP_NAME_LEN: usize = 128;

/// Max length of any free-text field (names, emails, phone numbers).
pub const MAX_TEXT_LEN: usize = 256;

pub const MAX_BARBERS_PER_SHOP: usize = 1_000;
pub const MAX_SERVICES_PER_SHOP: usize = 1_000;
pub const MAX_APPOINTMENTS_PER_SHOP: usize = 1_000_000;
pub const MAX_QUEUE_ENTRIES_PER_SHOP: usize = 100_000;
