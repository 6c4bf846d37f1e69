/// ABI bindings for the `AuditLog` contract.
///
/// Calls are encoded with the generated `*Call` structs and return data is
/// decoded with `SolValue`, so the client never handles raw selectors.
use alloy::sol;

sol! {
    interface AuditLog {
        event RecordStored(bytes32 recordId);

        function storeHash(bytes32 recordHash) external;
        function storeRecord(string data) external returns (bytes32);
        function getRecord(bytes32 id) external view returns (string);
        function checkHash(bytes32 recordHash) external view returns (bool);
        function owner() external view returns (address);

        function addAuthorized(address account) external;
        function removeAuthorized(address account) external;
        function isAuthorized(address account) external view returns (bool);

        function giveConsent(address patient, string consentType) external;
        function revokeConsent(address patient, string consentType) external;
        function hasConsent(address patient, string consentType) external view returns (bool);
    }
}

/// Gas limits per transaction kind.
pub const STORE_HASH_GAS: u64 = 200_000;
pub const STORE_RECORD_GAS: u64 = 800_000;
pub const STORE_RECORD_WITH_ID_GAS: u64 = 300_000;
pub const ACCESS_CONTROL_GAS: u64 = 100_000;
