//! Kernel error type
//!
//! Every fallible kernel call returns [`KernelResult`]. Codes are grouped
//! by area so a raw value in a debugger still tells where it came from.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[repr(u16)]
pub enum KernelError {
    // ============ Argument errors ============
    /// Bad parameter (zero period, wrong item size, idle task as target, ...)
    InvalidArgument = 1001,
    /// Handle does not name a live object
    InvalidHandle = 1002,
    /// Priority outside 0..MAX_PRIORITIES
    InvalidPriority = 1003,
    /// Operation not supported by this object kind
    WrongKind = 1004,

    // ============ Resource errors ============
    /// Heap could not satisfy an allocation
    OutOfMemory = 2001,
    /// Fixed object table is full
    NoFreeSlot = 2002,

    // ============ Wait errors ============
    /// A blocking call gave up after its timeout
    Timeout = 3001,
    /// A non-blocking call could not complete
    WouldBlock = 3002,

    // ============ Context errors ============
    /// Task-level API called from an interrupt handler
    IsrMisuse = 4001,
    /// Caller would block while the scheduler is suspended
    SchedulerSuspended = 4002,
    /// Scheduler has not been started
    SchedulerNotRunning = 4003,
    /// Scheduler is already running
    SchedulerRunning = 4004,

    // ============ Configuration errors ============
    /// Inconsistent configuration or disabled allocation scheme
    Configuration = 5001,

    // ============ Task errors ============
    /// Stack overflow detected at switch-out
    StackOverflow = 6001,
    /// Task is not suspended
    NotSuspended = 6002,
    /// Notification already pending
    AlreadyPending = 6003,

    // ============ Mutex errors ============
    /// Caller does not own the mutex
    NotOwner = 7001,
    /// Caller already owns the (non-recursive) mutex
    AlreadyOwned = 7002,
    /// Recursive mutex nesting counter overflow
    RecursionOverflow = 7003,

    // ============ Queue errors ============
    /// Queue is already a member of a set
    AlreadyInSet = 8001,
    /// Queue is not a member of the given set
    NotInSet = 8002,
    /// Queue must be empty for this operation
    NotEmpty = 8003,
    /// Tasks are still waiting on the object
    ObjectInUse = 8004,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Numeric code
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// True for the two outcomes of a bounded wait
    #[inline]
    pub const fn is_wait_failure(self) -> bool {
        matches!(self, KernelError::Timeout | KernelError::WouldBlock)
    }
}
