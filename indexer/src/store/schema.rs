//! Idempotent DDL executed at startup.
//!
//! Statement order follows the dependency graph; every statement is
//! `IF NOT EXISTS` so re-running on a populated database is a no-op.

pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS blocks (
        block_number        BIGINT PRIMARY KEY,
        block_hash          VARCHAR(64) NOT NULL UNIQUE,
        parent_hash         VARCHAR(64) NOT NULL,
        timestamp           BIGINT NOT NULL,
        proposer            VARCHAR(160) NOT NULL,
        state_hash          VARCHAR(64),
        state_root_hash     VARCHAR(64),
        pre_state_hash      VARCHAR(64),
        finalization_status VARCHAR(20) NOT NULL DEFAULT 'finalized',
        bonds_map           JSONB,
        justifications      JSONB,
        fault_tolerance     DOUBLE PRECISION,
        seq_num             INTEGER,
        sig                 VARCHAR(140),
        sig_algorithm       VARCHAR(20),
        shard_id            VARCHAR(20),
        extra_bytes         TEXT,
        version             INTEGER,
        deployment_count    INTEGER NOT NULL DEFAULT 0,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_blocks_proposer ON blocks (proposer)",
    r#"
    CREATE TABLE IF NOT EXISTS validators (
        public_key       VARCHAR(160) PRIMARY KEY,
        name             VARCHAR(160),
        total_stake      BIGINT NOT NULL DEFAULT 0,
        first_seen_block BIGINT,
        last_seen_block  BIGINT,
        status           VARCHAR(20) NOT NULL DEFAULT 'bonded',
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_validators_status ON validators (status)",
    r#"
    CREATE TABLE IF NOT EXISTS deployments (
        deploy_id                VARCHAR(160) PRIMARY KEY,
        block_hash               VARCHAR(64) NOT NULL
                                 REFERENCES blocks (block_hash) ON DELETE CASCADE,
        block_number             BIGINT NOT NULL
                                 REFERENCES blocks (block_number) ON DELETE CASCADE,
        deployer                 VARCHAR(160) NOT NULL,
        term                     TEXT NOT NULL,
        timestamp                BIGINT NOT NULL,
        sig                      VARCHAR(160) NOT NULL,
        sig_algorithm            VARCHAR(20) DEFAULT 'secp256k1',
        phlo_price               BIGINT NOT NULL DEFAULT 1,
        phlo_limit               BIGINT NOT NULL DEFAULT 1000000,
        phlo_cost                BIGINT NOT NULL DEFAULT 0,
        valid_after_block_number BIGINT,
        errored                  BOOLEAN NOT NULL DEFAULT FALSE,
        error_message            TEXT,
        deployment_type          VARCHAR(50),
        seq_num                  INTEGER,
        shard_id                 VARCHAR(20),
        status                   VARCHAR(20) NOT NULL DEFAULT 'included',
        created_at               TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_deployments_block ON deployments (block_number)",
    "CREATE INDEX IF NOT EXISTS idx_deployments_deployer ON deployments (deployer)",
    "CREATE INDEX IF NOT EXISTS idx_deployments_timestamp ON deployments (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_deployments_errored ON deployments (errored)",
    "CREATE INDEX IF NOT EXISTS idx_deployments_type ON deployments (deployment_type)",
    r#"
    CREATE TABLE IF NOT EXISTS transfers (
        id           BIGSERIAL PRIMARY KEY,
        deploy_id    VARCHAR(160) NOT NULL
                     REFERENCES deployments (deploy_id) ON DELETE CASCADE,
        block_number BIGINT NOT NULL
                     REFERENCES blocks (block_number) ON DELETE CASCADE,
        from_address VARCHAR(150) NOT NULL,
        to_address   VARCHAR(150) NOT NULL,
        amount_dust  BIGINT NOT NULL,
        amount_asi   NUMERIC(20, 8) NOT NULL,
        status       VARCHAR(20) NOT NULL DEFAULT 'success',
        timestamp    BIGINT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_address)",
    "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_address)",
    "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number)",
    r#"
    CREATE TABLE IF NOT EXISTS validator_bonds (
        id                   BIGSERIAL PRIMARY KEY,
        block_hash           VARCHAR(64) NOT NULL
                             REFERENCES blocks (block_hash) ON DELETE CASCADE,
        block_number         BIGINT NOT NULL
                             REFERENCES blocks (block_number) ON DELETE CASCADE,
        validator_public_key VARCHAR(160) NOT NULL
                             REFERENCES validators (public_key),
        stake                BIGINT NOT NULL,
        CONSTRAINT uq_block_validator UNIQUE (block_hash, validator_public_key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_validator_bonds_block ON validator_bonds (block_number)",
    "CREATE INDEX IF NOT EXISTS idx_validator_bonds_validator ON validator_bonds (validator_public_key)",
    r#"
    CREATE TABLE IF NOT EXISTS block_validators (
        block_hash           VARCHAR(64) NOT NULL
                             REFERENCES blocks (block_hash) ON DELETE CASCADE,
        validator_public_key VARCHAR(160) NOT NULL,
        PRIMARY KEY (block_hash, validator_public_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS balance_states (
        id                    BIGSERIAL PRIMARY KEY,
        address               VARCHAR(150) NOT NULL,
        block_number          BIGINT NOT NULL
                              REFERENCES blocks (block_number) ON DELETE CASCADE,
        unbonded_balance_dust BIGINT NOT NULL DEFAULT 0,
        unbonded_balance_asi  NUMERIC(20, 8) NOT NULL DEFAULT 0,
        bonded_balance_dust   BIGINT NOT NULL DEFAULT 0,
        bonded_balance_asi    NUMERIC(20, 8) NOT NULL DEFAULT 0,
        updated_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_balance_address_block UNIQUE (address, block_number)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_balance_states_address ON balance_states (address)",
    r#"
    CREATE TABLE IF NOT EXISTS epoch_transitions (
        id                BIGSERIAL PRIMARY KEY,
        epoch_number      BIGINT NOT NULL UNIQUE,
        start_block       BIGINT NOT NULL,
        end_block         BIGINT NOT NULL,
        active_validators INTEGER NOT NULL,
        quarantine_length BIGINT NOT NULL,
        timestamp         TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_epoch_blocks ON epoch_transitions (start_block, end_block)",
    r#"
    CREATE TABLE IF NOT EXISTS network_stats (
        id                       BIGSERIAL PRIMARY KEY,
        block_number             BIGINT NOT NULL,
        total_validators         INTEGER NOT NULL,
        active_validators        INTEGER NOT NULL,
        validators_in_quarantine INTEGER NOT NULL DEFAULT 0,
        consensus_participation  NUMERIC(5, 2) NOT NULL,
        consensus_status         VARCHAR(20) NOT NULL,
        timestamp                TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_network_stats_block ON network_stats (block_number)",
    r#"
    CREATE TABLE IF NOT EXISTS indexer_state (
        key        VARCHAR(50) PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reorgs (
        id                   BIGSERIAL PRIMARY KEY,
        fork_point           BIGINT NOT NULL,
        depth                BIGINT NOT NULL,
        orphaned_blocks      JSONB NOT NULL,
        affected_deployments BIGINT NOT NULL DEFAULT 0,
        affected_transfers   BIGINT NOT NULL DEFAULT 0,
        detected_at          TIMESTAMPTZ NOT NULL,
        handled_at           TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Reverse dependency order for the `reset` administrative path.
pub const DROP_TABLES: &[&str] = &[
    "DROP TABLE IF EXISTS reorgs",
    "DROP TABLE IF EXISTS indexer_state",
    "DROP TABLE IF EXISTS network_stats",
    "DROP TABLE IF EXISTS epoch_transitions",
    "DROP TABLE IF EXISTS balance_states",
    "DROP TABLE IF EXISTS block_validators",
    "DROP TABLE IF EXISTS validator_bonds",
    "DROP TABLE IF EXISTS transfers",
    "DROP TABLE IF EXISTS deployments",
    "DROP TABLE IF EXISTS validators",
    "DROP TABLE IF EXISTS blocks",
];
