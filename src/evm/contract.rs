use alloy::sol;

sol! {
    /// Settlement contract holding one escrow entry per secret hash.
    ///
    /// The hash lock is SHA-256 on both chains; a contract keyed on
    /// keccak-256 would be incompatible with the Bitcoin leg.
    contract BtcSettlement {
        function createEscrow(
            bytes32 secretHash,
            address user,
            address token,
            uint256 amount,
            uint256 timelock
        ) external payable;

        function claimEscrow(bytes32 secretHash, bytes32 secret) external;

        function refundEscrow(bytes32 secretHash) external;

        function escrows(bytes32 secretHash)
            external
            view
            returns (
                address user,
                address resolver,
                address token,
                uint256 amount,
                uint256 timelock,
                bool claimed,
                bool refunded
            );

        event SecretRevealed(
            bytes32 indexed secretHash,
            bytes32 secret,
            address resolver,
            address user
        );
    }
}
