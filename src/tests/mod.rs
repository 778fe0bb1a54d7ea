// Test modules for EmberDB

#[cfg(test)]
pub mod bloom_tests;

#[cfg(test)]
pub mod checkpoint_tests;


#[cfg(test)]
pub mod durability_tests;

#[cfg(test)]
pub mod engine_tests;

#[cfg(test)]
pub mod eviction_tests;

#[cfg(test)]
pub mod hash_table_tests;

#[cfg(test)]
pub mod hlc_tests;

#[cfg(test)]
pub mod pager_tests;



#[cfg(test)]
pub mod xattr_tests;
