//! OS interface: zeroed, never-returned page allocations for the immortal heap.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use core::ffi::c_void;

        const PROT_READ: i32 = 0x1;
        const PROT_WRITE: i32 = 0x2;
        const MAP_PRIVATE: i32 = 0x02;

        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
                const MAP_ANONYMOUS: i32 = 0x1000;
            } else {
                const MAP_ANONYMOUS: i32 = 0x20;
            }
        }

        const MAP_FAILED: *mut c_void = !0usize as *mut c_void;

        unsafe extern "C" {
            fn mmap(addr: *mut c_void, len: usize, prot: i32, flags: i32, fd: i32, offset: i64)
                -> *mut c_void;
        }

        /// Map `size` bytes of zeroed, read/write memory. Returns null on failure.
        pub fn page_alloc(size: usize) -> *mut u8 {
            let ptr = unsafe {
                mmap(
                    core::ptr::null_mut(),
                    size,
                    PROT_READ | PROT_WRITE,
                    MAP_PRIVATE | MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == MAP_FAILED {
                core::ptr::null_mut()
            } else {
                ptr as *mut u8
            }
        }

        pub const fn page_size() -> usize {
            4096
        }
    } else if #[cfg(windows)] {
        use core::ffi::c_void;

        const MEM_COMMIT: u32 = 0x1000;
        const MEM_RESERVE: u32 = 0x2000;
        const PAGE_READWRITE: u32 = 0x04;

        #[link(name = "kernel32")]
        unsafe extern "system" {
            fn VirtualAlloc(addr: *mut c_void, size: usize, alloc_type: u32, protect: u32)
                -> *mut c_void;
        }

        /// Commit `size` bytes of zeroed, read/write memory. Returns null on failure.
        pub fn page_alloc(size: usize) -> *mut u8 {
            unsafe {
                VirtualAlloc(
                    core::ptr::null_mut(),
                    size,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_READWRITE,
                ) as *mut u8
            }
        }

        // VirtualAlloc hands out 64 KiB-aligned regions.
        pub const fn page_size() -> usize {
            65536
        }
    } else {
        /// Allocate `size` zeroed bytes from the system allocator. Returns null on failure.
        pub fn page_alloc(size: usize) -> *mut u8 {
            match std::alloc::Layout::from_size_align(size, page_size()) {
                Ok(layout) => unsafe { std::alloc::alloc_zeroed(layout) },
                Err(_) => core::ptr::null_mut(),
            }
        }

        pub const fn page_size() -> usize {
            4096
        }
    }
}
