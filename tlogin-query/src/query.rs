//! Query manager request and response types.

use std::net::Ipv4Addr;

use tlogin_protocol::WireReader;

use crate::error::QueryError;

/// Application type announced when authenticating the link.
pub const APPLICATION_TYPE_LOGIN: u8 = 2;

/// Maximum number of characters accepted for a single account.
pub const MAX_CHARACTERS: usize = 50;

/// Room reserved for character and world names, terminator included.
pub const MAX_NAME_LENGTH: usize = 30;

/// Query type discriminator, the first payload byte of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryType {
    Login = 0,
    LoginAccount = 11,
    GetWorlds = 150,
}

impl QueryType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Status byte at the start of every response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Ok,
    Error,
    Failed,
    Other(u8),
}

impl QueryStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => QueryStatus::Ok,
            1 => QueryStatus::Error,
            3 => QueryStatus::Failed,
            other => QueryStatus::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            QueryStatus::Ok => 0,
            QueryStatus::Error => 1,
            QueryStatus::Failed => 3,
            QueryStatus::Other(code) => code,
        }
    }
}

/// Character entry returned by an account login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub name: String,
    pub world_name: String,
    pub world_address: Ipv4Addr,
    pub world_port: u16,
}

/// Game world record returned by the world listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct World {
    pub name: String,
    pub world_type: u8,
    pub players: u16,
    pub max_players: u16,
    pub online_peak: u16,
    pub online_peak_timestamp: u32,
    pub last_startup: u32,
    pub last_shutdown: u32,
}

/// Reasons the query manager gives for refusing an account login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginDenial {
    InvalidAccount = 1,
    InvalidPassword = 2,
    AccountDisabled = 3,
    IpBlocked = 4,
    AccountBanished = 5,
    IpBanished = 6,
}

impl LoginDenial {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(LoginDenial::InvalidAccount),
            2 => Some(LoginDenial::InvalidPassword),
            3 => Some(LoginDenial::AccountDisabled),
            4 => Some(LoginDenial::IpBlocked),
            5 => Some(LoginDenial::AccountBanished),
            6 => Some(LoginDenial::IpBanished),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Outcome of an account login query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountLogin {
    Granted {
        characters: Vec<Character>,
        premium_days: u16,
    },
    Denied(LoginDenial),
}

/// Decodes the body of an account login response.
pub(crate) fn parse_account_login(
    status: QueryStatus,
    reader: &mut WireReader<'_>,
) -> Result<AccountLogin, QueryError> {
    match status {
        QueryStatus::Ok => {
            let count = reader.read_u8() as usize;
            if count > MAX_CHARACTERS {
                return Err(QueryError::TooManyCharacters(count));
            }

            let mut characters = Vec::with_capacity(count);
            for _ in 0..count {
                let name = reader.read_string_bounded(MAX_NAME_LENGTH);
                let world_name = reader.read_string_bounded(MAX_NAME_LENGTH);
                let world_address = Ipv4Addr::from(reader.read_u32_be());
                let world_port = reader.read_u16();
                characters.push(Character {
                    name,
                    world_name,
                    world_address,
                    world_port,
                });
            }
            let premium_days = reader.read_u16();

            if reader.overflowed() {
                return Err(QueryError::Overflowed("account login response"));
            }
            Ok(AccountLogin::Granted {
                characters,
                premium_days,
            })
        }
        QueryStatus::Error => {
            let code = reader.read_u8();
            if reader.overflowed() {
                return Err(QueryError::Overflowed("account login error code"));
            }
            LoginDenial::from_code(code)
                .map(AccountLogin::Denied)
                .ok_or(QueryError::UnexpectedErrorCode(code))
        }
        other => Err(QueryError::UnexpectedStatus(other.code())),
    }
}

/// Decodes a world listing and picks the requested world.
///
/// An empty `name` selects the world with the most players online, the
/// first one winning ties. Otherwise names are compared case-insensitively.
pub(crate) fn select_world(
    status: QueryStatus,
    reader: &mut WireReader<'_>,
    name: &str,
) -> Result<Option<World>, QueryError> {
    if status != QueryStatus::Ok {
        return Err(QueryError::UnexpectedStatus(status.code()));
    }

    let count = reader.read_u8();
    let mut selected: Option<World> = None;
    for _ in 0..count {
        let world = World {
            name: reader.read_string_bounded(MAX_NAME_LENGTH),
            world_type: reader.read_u8(),
            players: reader.read_u16(),
            max_players: reader.read_u16(),
            online_peak: reader.read_u16(),
            online_peak_timestamp: reader.read_u32(),
            last_startup: reader.read_u32(),
            last_shutdown: reader.read_u32(),
        };
        if reader.overflowed() {
            return Err(QueryError::Overflowed("world list response"));
        }

        if name.is_empty() {
            let busier = selected
                .as_ref()
                .map_or(true, |best| world.players > best.players);
            if busier {
                selected = Some(world);
            }
        } else if world.name.eq_ignore_ascii_case(name) {
            selected = Some(world);
            break;
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlogin_protocol::WireWriter;

    fn write_world(writer: &mut WireWriter<'_>, name: &str, players: u16) {
        writer.write_string(name);
        writer.write_u8(0);
        writer.write_u16(players);
        writer.write_u16(1000);
        writer.write_u16(players + 10);
        writer.write_u32(1_700_000_000);
        writer.write_u32(1_700_000_100);
        writer.write_u32(1_600_000_000);
    }

    fn world_list(worlds: &[(&str, u16)]) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_u8(worlds.len() as u8);
        for (name, players) in worlds {
            write_world(&mut writer, name, *players);
        }
        let len = writer.position();
        buf.truncate(len);
        buf
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(QueryStatus::from_code(0), QueryStatus::Ok);
        assert_eq!(QueryStatus::from_code(1), QueryStatus::Error);
        assert_eq!(QueryStatus::from_code(3), QueryStatus::Failed);
        assert_eq!(QueryStatus::from_code(2), QueryStatus::Other(2));
        assert_eq!(QueryStatus::Other(9).code(), 9);
        assert_eq!(QueryType::GetWorlds.code(), 150);
    }

    #[test]
    fn test_parse_granted_login() {
        let mut buf = [0u8; 128];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_u8(1);
        writer.write_string("Knightly");
        writer.write_string("Antica");
        writer.write_u32_be(0x7F00_0001);
        writer.write_u16(7172);
        writer.write_u16(30);
        let len = writer.position();

        let mut reader = WireReader::new(&buf[..len]);
        let login = parse_account_login(QueryStatus::Ok, &mut reader).unwrap();
        assert_eq!(
            login,
            AccountLogin::Granted {
                characters: vec![Character {
                    name: "Knightly".to_string(),
                    world_name: "Antica".to_string(),
                    world_address: Ipv4Addr::new(127, 0, 0, 1),
                    world_port: 7172,
                }],
                premium_days: 30,
            }
        );
    }

    #[test]
    fn test_overlong_names_read_empty() {
        let long_name = "N".repeat(MAX_NAME_LENGTH);
        let mut buf = [0u8; 128];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_u8(1);
        writer.write_string(&long_name);
        writer.write_string("Antica");
        writer.write_u32_be(0x7F00_0001);
        writer.write_u16(7172);
        writer.write_u16(0);
        let len = writer.position();

        let mut reader = WireReader::new(&buf[..len]);
        match parse_account_login(QueryStatus::Ok, &mut reader).unwrap() {
            AccountLogin::Granted { characters, .. } => {
                assert_eq!(characters[0].name, "");
                assert_eq!(characters[0].world_name, "Antica");
                assert_eq!(characters[0].world_port, 7172);
            }
            other => panic!("unexpected login result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_denied_login() {
        let data = [4u8];
        let mut reader = WireReader::new(&data);
        assert_eq!(
            parse_account_login(QueryStatus::Error, &mut reader).unwrap(),
            AccountLogin::Denied(LoginDenial::IpBlocked)
        );

        let data = [7u8];
        let mut reader = WireReader::new(&data);
        assert!(matches!(
            parse_account_login(QueryStatus::Error, &mut reader),
            Err(QueryError::UnexpectedErrorCode(7))
        ));
    }

    #[test]
    fn test_parse_login_failure_status() {
        let mut reader = WireReader::new(&[]);
        assert!(matches!(
            parse_account_login(QueryStatus::Failed, &mut reader),
            Err(QueryError::UnexpectedStatus(3))
        ));
    }

    #[test]
    fn test_parse_too_many_characters() {
        let data = [51u8];
        let mut reader = WireReader::new(&data);
        assert!(matches!(
            parse_account_login(QueryStatus::Ok, &mut reader),
            Err(QueryError::TooManyCharacters(51))
        ));
    }

    #[test]
    fn test_parse_truncated_login() {
        // Claims two characters but carries none.
        let data = [2u8];
        let mut reader = WireReader::new(&data);
        assert!(matches!(
            parse_account_login(QueryStatus::Ok, &mut reader),
            Err(QueryError::Overflowed(_))
        ));
    }

    #[test]
    fn test_select_busiest_world() {
        let data = world_list(&[("Antica", 10), ("Secura", 25), ("Nova", 25)]);
        let mut reader = WireReader::new(&data);
        let world = select_world(QueryStatus::Ok, &mut reader, "").unwrap().unwrap();
        assert_eq!(world.name, "Secura");
        assert_eq!(world.online_peak, 35);
    }

    #[test]
    fn test_select_world_by_name() {
        let data = world_list(&[("Antica", 10), ("Secura", 25)]);
        let mut reader = WireReader::new(&data);
        let world = select_world(QueryStatus::Ok, &mut reader, "antica")
            .unwrap()
            .unwrap();
        assert_eq!(world.name, "Antica");
        assert_eq!(world.players, 10);
        assert_eq!(world.last_startup, 1_700_000_100);
    }

    #[test]
    fn test_select_world_not_found() {
        let data = world_list(&[("Antica", 10)]);
        let mut reader = WireReader::new(&data);
        assert_eq!(select_world(QueryStatus::Ok, &mut reader, "Zanera").unwrap(), None);

        let data = world_list(&[]);
        let mut reader = WireReader::new(&data);
        assert_eq!(select_world(QueryStatus::Ok, &mut reader, "").unwrap(), None);
    }

    #[test]
    fn test_select_world_failed_query() {
        let mut reader = WireReader::new(&[]);
        assert!(matches!(
            select_world(QueryStatus::Failed, &mut reader, ""),
            Err(QueryError::UnexpectedStatus(3))
        ));
    }
}
