use crate::define_id;

define_id!(
    /// The customer a machine belongs to.
    TenantId => "tnt"
);

define_id!(
    /// A machine reporting its inventory. Unique per (hardware id, tenant).
    MachineId => "mach"
);

define_id!(
    /// A stored component row. Assigned by the store at insert and kept
    /// across deactivation and reactivation.
    ComponentId => "cmp"
);

define_id!(RequestId => "req");
