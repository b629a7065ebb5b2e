//! Library units registered by a full reset.
//!
//! They are added as libraries, so they cost nothing unless a user unit
//! imports them.

/// Name and text of every standard library unit.
pub static STANDARD_SOURCES: &[(&str, &str)] = &[
    (
        "Coin",
        r#"contract Coin {
    function isApprovedFor(address target, address proxy) view returns (bool r) {}
    function isApproved(address proxy) view returns (bool r) {}
    function sendCoinFrom(address from, uint256 value, address to) {}
    function coinBalanceOf(address a) view returns (uint256 r) {}
    function sendCoin(uint256 value, address to) {}
    function coinBalance() view returns (uint256 r) {}
    function approve(address a) {}
}
"#,
    ),
    (
        "CoinReg",
        r#"contract CoinReg {
    function count() view returns (uint256 r) {}
    function info(uint256 i) view returns (address addr, bytes3 name, uint256 denom) {}
    function register(bytes3 name, uint256 denom) {}
    function unregister() {}
}
"#,
    ),
    (
        "Config",
        r#"contract Config {
    function lookup(uint256 key) view returns (address a) {}
    function kill() {}
    function unregister(uint256 id) {}
    function register(uint256 key, address addr) {}
}
"#,
    ),
    (
        "NameReg",
        r#"contract NameReg {
    function register(bytes32 name) {}
    function addressOf(bytes32 name) view returns (address addr) {}
    function unregister() {}
    function nameOf(address addr) view returns (bytes32 name) {}
}
"#,
    ),
    (
        "coin",
        r#"import "CoinReg";
import "Config";
import "configUser";

contract coin is configUser {
    constructor(bytes3 name, uint256 denom) {
        CoinReg(Config(configAddr()).lookup(3)).register(name, denom);
    }
}
"#,
    ),
    (
        "configUser",
        r#"contract configUser {
    function configAddr() view returns (address a) {
        return address(0xc6d9d2cd449a754c494264e1809c50e34d64562b);
    }
}
"#,
    ),
    (
        "mortal",
        r#"import "owned";

contract mortal is owned {
    function kill() {
        if (msg.sender == owner) selfdestruct(owner);
    }
}
"#,
    ),
    (
        "named",
        r#"import "Config";
import "NameReg";
import "configUser";

contract named is configUser {
    constructor(bytes32 name) {
        NameReg(Config(configAddr()).lookup(1)).register(name);
    }
}
"#,
    ),
    (
        "owned",
        r#"contract owned {
    address owner;

    constructor() {
        owner = msg.sender;
    }

    modifier onlyowner() {
        if (msg.sender == owner) _;
    }
}
"#,
    ),
    (
        "service",
        r#"import "Config";
import "configUser";

contract service is configUser {
    constructor(uint256 n) {
        Config(configAddr()).register(n, this);
    }
}
"#,
    ),
    (
        "std",
        r#"import "owned";
import "mortal";
import "Config";
import "configUser";
import "NameReg";
import "named";
"#,
    ),
];

/// Whether `name` is one of [`STANDARD_SOURCES`].
pub fn is_standard_source(name: &str) -> bool {
    STANDARD_SOURCES.iter().any(|(standard, _)| *standard == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::NodeIdGen;
    use covenant_parser::Parser;

    #[test]
    fn every_unit_parses() {
        let mut ids = NodeIdGen::new();
        for (name, text) in STANDARD_SOURCES {
            if let Err(err) = Parser::parse(name, text, &mut ids) {
                panic!("{name}: {err}");
            }
        }
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = STANDARD_SOURCES.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), STANDARD_SOURCES.len());
        assert!(is_standard_source("std"));
        assert!(!is_standard_source(""));
    }
}
