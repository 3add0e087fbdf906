pub mod mock_method;
