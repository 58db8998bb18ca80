//! Fixed names and paths shared across the agent.

/// File under the data directory holding the trust bundle as concatenated DER.
pub const BUNDLE_CACHE_FILE: &str = "bundle.der";

/// File under the data directory holding the agent SVID chain as concatenated DER.
pub const SVID_CACHE_FILE: &str = "agent_svid.der";

/// Path component of the SPIFFE ID every trust server presents.
pub const SERVER_ID_PATH: &str = "/spire/server";

/// gRPC method carrying the per-identity renewal stream.
pub const FETCH_SVID_PATH: &str = "/spire.api.node.Node/FetchSVID";
